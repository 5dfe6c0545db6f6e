pub mod membership;
pub mod pool;
pub mod session;

pub use membership::{fetch_role, lock_actor_and_target, lock_member, require_member};
pub use pool::{create_pool, run_migrations};
