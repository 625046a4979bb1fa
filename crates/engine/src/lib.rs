pub mod authz;
pub mod cron_expr;
pub mod merge;
pub mod preferences;
pub mod processor;
pub mod resolver;
pub mod schedule;
pub mod system_config;
pub mod templates;
pub mod users;
