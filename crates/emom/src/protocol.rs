//! Named handler sets and application error encoding.
//!
//! Method names on the wire are `"<protocol>.<method>"`; the protocol name
//! may itself contain dots (`"ae.1"` + `"C"` → `"ae.1.C"`).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use emom_core::codec;
use emom_core::{EmomError, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) type MethodHandler =
    Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, anyhow::Result<Vec<u8>>> + Send + Sync>;

/// A named set of method handlers.
pub struct Protocol {
    name: String,
    methods: HashMap<String, MethodHandler>,
}

impl Protocol {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a typed handler. Arguments and results go through the emom
    /// codec; handler errors travel back to the caller as application errors.
    pub fn method<A, R, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: MethodHandler = Arc::new(move |args: Vec<u8>| {
            invoke_typed::<A, R, F, Fut>(handler.clone(), args).boxed()
        });
        self.methods.insert(name.into(), erased);
        self
    }

    pub(crate) fn handler(&self, method: &str) -> Option<MethodHandler> {
        self.methods.get(method).cloned()
    }
}

async fn invoke_typed<A, R, F, Fut>(handler: Arc<F>, args: Vec<u8>) -> anyhow::Result<Vec<u8>>
where
    A: DeserializeOwned,
    R: Serialize,
    F: Fn(A) -> Fut,
    Fut: Future<Output = anyhow::Result<R>>,
{
    let arg: A = codec::decode(&args)?;
    let result = handler(arg).await?;
    Ok(codec::encode(&result)?)
}

/// Split `"ae.1.C"` into `("ae.1", "C")`.
pub(crate) fn split_method(full: &str) -> Option<(&str, &str)> {
    full.rsplit_once('.')
        .filter(|(protocol, method)| !protocol.is_empty() && !method.is_empty())
}

/// Server side: turns a handler error into the bytes carried in
/// `ResponsePlaintext.error`.
pub trait ErrorWrapper: Send + Sync {
    fn wrap_error(&self, err: &anyhow::Error) -> Result<Vec<u8>>;
}

/// Client side: turns `ResponsePlaintext.error` back into an error.
pub trait ErrorUnwrapper: Send + Sync {
    fn unwrap_error(&self, encoded: &[u8]) -> EmomError;
}

/// Carries application errors as their display string.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringErrors;

impl ErrorWrapper for StringErrors {
    fn wrap_error(&self, err: &anyhow::Error) -> Result<Vec<u8>> {
        codec::encode(&format!("{err:#}"))
    }
}

impl ErrorUnwrapper for StringErrors {
    fn unwrap_error(&self, encoded: &[u8]) -> EmomError {
        match codec::decode::<String>(encoded) {
            Ok(message) => EmomError::Remote(message),
            Err(err) => err,
        }
    }
}
