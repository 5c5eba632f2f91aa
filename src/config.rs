//! Runtime configuration, read from the environment with teacher-style
//! hardcoded fallbacks (the teacher's `server.rs` bound a literal
//! `"127.0.0.1:8080"`; here the same default is overridable).

use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub default_time_per_attempt: f64,
    pub default_max_attempts: u32,
    pub default_patience: u32,
    pub pool_teacher_display_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            default_time_per_attempt: 5.0,
            default_max_attempts: 10,
            default_patience: 3,
            pool_teacher_display_name: "Lehrkräfte-Pool".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env::var("PLANNER_BIND_ADDR").unwrap_or(defaults.bind_addr),
            default_time_per_attempt: env::var("PLANNER_DEFAULT_TIME_PER_ATTEMPT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_time_per_attempt),
            default_max_attempts: env::var("PLANNER_DEFAULT_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_max_attempts),
            default_patience: env::var("PLANNER_DEFAULT_PATIENCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_patience),
            pool_teacher_display_name: env::var("PLANNER_POOL_TEACHER_NAME")
                .unwrap_or(defaults.pool_teacher_display_name),
        }
    }
}
