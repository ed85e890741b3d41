use std::env;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Once;

const DEFAULT_ARENA_RESERVE: u64 = 1024 * 1024 * 1024;
const DEFAULT_ARENA_PURGE_DELAY_MS: u64 = 10_000;

/// Process-wide tunables, readable on the hot allocation/free path so they
/// live in atomics rather than behind a lock. Modeled on the env-var options
/// layer of `preload/src/opt.rs`, minus the startup-only variables that
/// don't apply once the process is already running.
pub struct Options {
    arena_reserve: AtomicU64,
    arena_purge_delay_ms: AtomicU64,
    reset_decommits: AtomicBool,
    limit_os_alloc: AtomicBool,
    eager_commit: AtomicBool,
}

static OPTIONS: Options = Options {
    arena_reserve: AtomicU64::new(DEFAULT_ARENA_RESERVE),
    arena_purge_delay_ms: AtomicU64::new(DEFAULT_ARENA_PURGE_DELAY_MS),
    reset_decommits: AtomicBool::new(false),
    limit_os_alloc: AtomicBool::new(false),
    eager_commit: AtomicBool::new(false),
};

static INIT: Once = Once::new();

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "on")
}

impl Options {
    /// Returns the process-wide options, parsing environment variables the
    /// first time this is called.
    pub fn get() -> &'static Options {
        INIT.call_once(|| OPTIONS.load_from_env());
        &OPTIONS
    }

    fn load_from_env(&self) {
        if let Ok(value) = env::var("MIMALLOC_ARENA_RESERVE") {
            if let Ok(parsed) = value.parse::<u64>() {
                info!("MIMALLOC_ARENA_RESERVE={}", parsed);
                self.arena_reserve.store(parsed, Ordering::Relaxed);
            }
        }
        if let Ok(value) = env::var("MIMALLOC_ARENA_PURGE_DELAY") {
            if let Ok(parsed) = value.parse::<u64>() {
                info!("MIMALLOC_ARENA_PURGE_DELAY={}", parsed);
                self.arena_purge_delay_ms.store(parsed, Ordering::Relaxed);
            }
        }
        if let Ok(value) = env::var("MIMALLOC_ARENA_RESET_DECOMMITS") {
            let parsed = parse_bool(&value);
            info!("MIMALLOC_ARENA_RESET_DECOMMITS={}", parsed);
            self.reset_decommits.store(parsed, Ordering::Relaxed);
        }
        if let Ok(value) = env::var("MIMALLOC_ARENA_LIMIT_OS_ALLOC") {
            let parsed = parse_bool(&value);
            info!("MIMALLOC_ARENA_LIMIT_OS_ALLOC={}", parsed);
            self.limit_os_alloc.store(parsed, Ordering::Relaxed);
        }
        if let Ok(value) = env::var("MIMALLOC_ARENA_EAGER_COMMIT") {
            let parsed = parse_bool(&value);
            info!("MIMALLOC_ARENA_EAGER_COMMIT={}", parsed);
            self.eager_commit.store(parsed, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn arena_reserve(&self) -> u64 {
        self.arena_reserve.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn arena_purge_delay_ms(&self) -> u64 {
        self.arena_purge_delay_ms.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn reset_decommits(&self) -> bool {
        self.reset_decommits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn limit_os_alloc(&self) -> bool {
        self.limit_os_alloc.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn eager_commit(&self) -> bool {
        self.eager_commit.load(Ordering::Relaxed)
    }
}
