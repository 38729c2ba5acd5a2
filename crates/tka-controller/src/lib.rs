//! The credential lifecycle controller (spec.md §4.C, §4.D): the `SignIn`
//! custom resource, the store built on top of it, and the level-triggered
//! reconciler that provisions and tears down the derived cluster objects.

pub mod crd;
pub mod metrics;
pub mod reconciler;
pub mod store;

pub use crd::{SignIn, SignInCrdSpec, SignInCrdStatus};
pub use store::{KubeSignInStore, SignInStore, StoreError};
