pub mod analysis;
pub mod badge;
pub mod batch;
pub mod dispatcher;
pub mod fusion;
pub mod recompute;
pub mod review;
