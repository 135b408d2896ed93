//! Intent validators.
//!
//! A [`Validator`] turns raw JSON input into the parsed payload of an intent,
//! or rejects it. Closures of the right shape are validators, and
//! [`Schema<T>`] validates by round-tripping through a serde type.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::foundation::ValidationError;

/// Parses raw intent input.
pub trait Validator: Send + Sync + 'static {
    /// Returns the parsed input, or why it was rejected.
    fn validate(&self, input: Value) -> Result<Value, ValidationError>;
}

impl<F> Validator for F
where
    F: Fn(Value) -> Result<Value, ValidationError> + Send + Sync + 'static,
{
    fn validate(&self, input: Value) -> Result<Value, ValidationError> {
        self(input)
    }
}

/// Accepts any input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyInput;

impl Validator for AnyInput {
    fn validate(&self, input: Value) -> Result<Value, ValidationError> {
        Ok(input)
    }
}

/// Validates by deserializing into `T` and serializing back.
///
/// Unknown fields are dropped unless `T` keeps them, and serde defaults are
/// filled in, mirroring what a schema parser would do.
pub struct Schema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Schema<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Schema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Schema<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Schema<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Schema")
            .field(&std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Validator for Schema<T>
where
    T: DeserializeOwned + Serialize + 'static,
{
    fn validate(&self, input: Value) -> Result<Value, ValidationError> {
        let parsed: T = serde_json::from_value(input)?;
        Ok(serde_json::to_value(parsed)?)
    }
}
