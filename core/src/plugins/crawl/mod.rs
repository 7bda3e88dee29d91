pub mod dir_bruter;
pub mod oracle_discovery;
