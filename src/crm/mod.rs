pub mod client;
pub mod sync;

pub use client::{CrmClient, CrmError, CrmResult};
pub use sync::CrmSync;
