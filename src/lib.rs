pub mod config;
pub mod error;
pub mod domain {
    pub mod attempt;
    pub mod audit;
    pub mod dates;
    pub mod event;
    pub mod job;
    pub mod policy;
    pub mod schedule;
}
pub mod eligibility {
    pub mod classifier;
    pub mod taxonomy;
}
pub mod gateways;
pub mod http {
    pub mod error;
    pub mod handlers {
        pub mod audit;
        pub mod jobs;
        pub mod ops;
        pub mod rejections;
        pub mod retry_policy;
        pub mod schedules;
    }
    pub mod middleware {
        pub mod admin_auth;
    }
    pub mod routes;
}
pub mod repo {
    pub mod audit_log_repo;
    pub mod memory;
    pub mod ports;
    pub mod retry_attempt_repo;
    pub mod retry_job_repo;
    pub mod retry_policy_repo;
    pub mod retry_schedule_repo;
}
pub mod service {
    pub mod attempt_executor;
    pub mod audit_logger;
    pub mod batch_orchestrator;
    pub mod engine;
    pub mod policy_resolver;
    pub mod rejection_stream;
    pub mod schedule_manager;
}

#[derive(Clone)]
pub struct AppState {
    pub engine: service::engine::RetryEngine,
    /// Absent when the engine runs over the in-memory store.
    pub pool: Option<sqlx::PgPool>,
}
