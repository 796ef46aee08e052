pub mod controller_chunks;
pub mod controller_purge;
pub mod controller_replicate;
pub mod database_test;
pub mod job_chunks;
pub mod job_move;
