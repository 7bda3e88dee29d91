pub mod payload_loader;

pub use payload_loader::{CandidateIter, CandidateList};
