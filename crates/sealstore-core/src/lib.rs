//! Core contracts for sealstore: the backing map and key slot seams, plus the
//! shared error taxonomy. Kept free of crypto dependencies.

pub mod keystore;
pub mod storage;
