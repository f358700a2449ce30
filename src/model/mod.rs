pub mod failed;
pub mod record;
