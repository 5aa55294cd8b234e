//! All Paths are recorded here for use throughout this codebase
pub mod base {
    pub const ROOT: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
}

pub const EVENTS: &str = "/events";
pub const EXPIRE_KEYS: &str = "/expire-keys";

pub mod rate_limits {
    pub const CHECK: &str = "/rate-limits/:key";
}

pub mod queue {
    pub const QUEUE: &str = "/queue";
    pub const MESSAGES: &str = "/queue/messages";
    pub const MESSAGE: &str = "/queue/messages/:id";
    pub const STATS: &str = "/queue/stats";
    pub const PROCESS: &str = "/queue/process";
}

pub mod conflicts {
    pub const PENDING: &str = "/conflicts";
    pub const STATS: &str = "/conflicts/stats";
    pub const HISTORY: &str = "/conflicts/history";
    pub const RESOLVE: &str = "/conflicts/:id/resolve";
}

pub mod state {
    pub const ALL: &str = "/state";
    pub const PATH: &str = "/state/*path";
}

pub fn resolve_path(conflict_id: &str) -> String {
    conflicts::RESOLVE.replace(":id", conflict_id)
}

pub fn state_path(path: &str) -> String {
    state::PATH.replace("*path", path)
}
