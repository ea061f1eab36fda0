//! Approximate homomorphic encryption over the complex numbers (CKKS) with
//! full bootstrapping.
//!
//! The crate implements the leveled scheme (encoding, encryption, the usual
//! evaluator operations) on top of an RNS ring backend, and a bootstrapping
//! pipeline that refreshes an exhausted ciphertext back to a high level:
//! modulus raising, homomorphic encoding (CoeffsToSlots), approximate modular
//! reduction by a scaled sine, and homomorphic decoding (SlotsToCoeffs).
//!
//! ```no_run
//! use ckks_rs::{BootstrapParameterSet, Bootstrapper, ClientKey, DefaultSecureRng};
//! use std::sync::Arc;
//!
//! let set = BootstrapParameterSet::set1();
//! let params = Arc::new(set.ckks_parameters().unwrap());
//! let mut rng = DefaultSecureRng::new();
//! let ck = ClientKey::new_with_rng(&params, &mut rng);
//!
//! let rotations = ckks_rs::rotations_for_bootstrapping(&params, &set.boot).unwrap();
//! let keys = Arc::new(ck.gen_evaluation_keys(&rotations, &mut rng));
//! let bootstrapper = Bootstrapper::new(&params, &set.boot, &keys).unwrap();
//! # let _ = bootstrapper;
//! ```

mod backend;
pub mod bootstrap;
mod encoding;
mod error;
mod evaluator;
mod ntt;
mod params;
mod ring;
mod rlwe;
mod utils;

pub use bootstrap::{rotations_for_bootstrapping, Bootstrapper};
pub use encoding::{Encoder, Plaintext};
pub use error::{Error, Result};
pub use evaluator::Evaluator;
pub use params::{
    default_bootstrap_params, BootstrapParameterSet, BootstrapParameters, CkksParameters,
    CkksParametersBuilder, SineType,
};
pub use rlwe::{
    keyswitch::{EvaluationKeys, SwitchingKey},
    Ciphertext, ClientKey,
};
pub use utils::DefaultSecureRng;

pub trait Encryptor<M: ?Sized, C> {
    fn encrypt(&self, m: &M) -> Result<C>;
}

pub trait Decryptor<M, C> {
    fn decrypt(&self, c: &C) -> M;
}
