use std::fmt;

/// Errors the arena manager can report back to its caller. Kept as a plain
/// enum rather than a boxed trait object: the allocation hot path has no
/// business paying for that, and every variant here maps directly onto an
/// errno the segment layer already knows how to handle.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ArenaErrorKind {
    /// The OS would not give us the memory we asked for.
    Enomem,
    /// The caller passed a request that can never be satisfied.
    Einval,
    /// A transient condition (lost a race, arena temporarily exhausted);
    /// the caller may retry.
    Eagain,
}

impl fmt::Display for ArenaErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArenaErrorKind::Enomem => write!(f, "ENOMEM"),
            ArenaErrorKind::Einval => write!(f, "EINVAL"),
            ArenaErrorKind::Eagain => write!(f, "EAGAIN"),
        }
    }
}

impl std::error::Error for ArenaErrorKind {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_errno_names() {
        assert_eq!(ArenaErrorKind::Enomem.to_string(), "ENOMEM");
        assert_eq!(ArenaErrorKind::Einval.to_string(), "EINVAL");
        assert_eq!(ArenaErrorKind::Eagain.to_string(), "EAGAIN");
    }
}
