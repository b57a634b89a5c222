//! Dependency resolution for handlers.
//!
//! A handler is any `async` function whose parameters implement
//! [`Dependency`]. [`call_with_dependencies`] resolves every parameter in
//! declaration order, invokes the handler and releases the scoped resources
//! acquired along the way.
//!
//! # Parameters
//!
//! - [`Message<P>`] - the message being handled, read from the bindings.
//! - [`Depends<P>`] - the output of provider `P`. A binding registered under
//!   the provider's name wins; otherwise the provider runs, with its own
//!   arguments resolved the same way. A provider runs at most once per call,
//!   every consumer of it in the resolution tree shares the same value.
//! - [`Bound<T>`] - a value bound by type, for example a connection pool
//!   shared by the whole process.
//! - `Option<D>` - `None` when `D` cannot be resolved.
//!
//! # Scoped resources
//!
//! A provider may return [`Provided::scoped`], pairing its value with a
//! release action. Release actions run in reverse acquisition order once the
//! handler is done, whether it succeeded, failed or panicked.
//!
//! ```rust,ignore
//! struct Db;
//!
//! impl Provider for Db {
//!     type Args = (Bound<Pool>,);
//!     type Output = Connection;
//!
//!     async fn provide((Bound(pool),): Self::Args) -> Result<Provided<Connection>> {
//!         let conn = pool.acquire().await?;
//!         let release = conn.clone();
//!         Ok(Provided::scoped(conn, move || async move { release.close().await }))
//!     }
//! }
//!
//! async fn handler(message: Message<GetUser>, Depends(conn): Depends<Db>) -> Result<User> { ... }
//! ```

use crate::{error::Error, message::Message, outcome::Result, schema::Object};
use futures::{FutureExt, future::BoxFuture};
use std::{
    any::{Any, TypeId, type_name},
    borrow::Cow,
    collections::HashMap,
    future::Future,
    ops::Deref,
    panic::AssertUnwindSafe,
    sync::Arc,
};
use thiserror::Error as ThisError;

/// Binding name under which the handled message is stored by default.
pub const MESSAGE_ARG: &str = "message";

/// Errors raised while resolving handler parameters.
#[derive(ThisError, Debug)]
pub enum ResolveError {
    /// Nothing can supply the parameter.
    #[error("unresolvable dependency parameter: {0}")]
    Unresolvable(String),

    /// A provider depends on itself.
    #[error("dependency cycle through provider {0}")]
    Cycle(&'static str),

    /// A provider returned an error.
    #[error("provider {name} failed: {source}")]
    Provider {
        /// Name of the provider.
        name: &'static str,
        /// The error it returned.
        #[source]
        source: Error,
    },
}

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Provider { source, .. } => source,
            other => Error::internal_from(&other),
        }
    }
}

// ============================================================================
// Bindings
// ============================================================================

/// Values supplied by the caller, keyed by name.
#[derive(Clone, Default)]
pub struct Bindings {
    values: HashMap<Cow<'static, str>, Arc<dyn Any + Send + Sync>>,
    message_arg: Option<Cow<'static, str>>,
}

impl Bindings {
    /// No bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` under `name`.
    pub fn bind<T>(mut self, name: impl Into<Cow<'static, str>>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.values.insert(name.into(), Arc::new(value));
        self
    }

    /// Bind `value` by type, for [`Bound<T>`] parameters.
    pub fn provide<T>(self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.bind(type_name::<T>(), value)
    }

    /// Bind the output of provider `P`, bypassing the provider.
    pub fn override_provider<P: Provider>(self, value: P::Output) -> Self {
        self.bind(P::name(), value)
    }

    /// Bind the handled message under `name`.
    pub fn with_message<P: Object>(
        mut self,
        name: impl Into<Cow<'static, str>>,
        message: Message<P>,
    ) -> Self {
        let name = name.into();
        self.message_arg = Some(name.clone());
        self.bind(name, message)
    }

    /// A clone of the value bound under `name`, if it has type `T`.
    pub fn get<T: Clone + 'static>(&self, name: &str) -> Option<T> {
        self.values.get(name)?.downcast_ref::<T>().cloned()
    }

    /// Whether something is bound under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Name the handled message is bound under.
    pub fn message_arg(&self) -> &str {
        self.message_arg.as_deref().unwrap_or(MESSAGE_ARG)
    }
}

impl std::fmt::Debug for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bindings")
            .field("names", &self.values.keys().collect::<Vec<_>>())
            .field("message_arg", &self.message_arg)
            .finish()
    }
}

// ============================================================================
// Providers
// ============================================================================

/// An action releasing a scoped resource.
pub struct Release(Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>);

impl Release {
    /// Wrap an async release action.
    pub fn new<F, Fut>(release: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self(Box::new(move || release().boxed()))
    }

    async fn run(self) {
        (self.0)().await
    }
}

/// What a provider hands back.
pub enum Provided<T> {
    /// A plain value.
    Value(T),
    /// A value whose resource must be released after the call.
    Scoped(T, Release),
}

impl<T> Provided<T> {
    /// A scoped value released by `release`.
    pub fn scoped<F, Fut>(value: T, release: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Provided::Scoped(value, Release::new(release))
    }
}

impl<T> From<T> for Provided<T> {
    fn from(value: T) -> Self {
        Provided::Value(value)
    }
}

/// A producer of a dependency value.
///
/// Providers are identified by type: the per-call cache is keyed by the
/// provider's `TypeId`, so two parameters asking for the same provider share
/// one value.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a dependency provider",
    label = "missing `Provider` implementation",
    note = "Implement `Provider` to use `{Self}` with `Depends<{Self}>`."
)]
pub trait Provider: Send + Sync + 'static {
    /// Parameters of the provider, resolved like handler parameters.
    type Args: Dependency;

    /// Value handed to consumers.
    type Output: Clone + Send + Sync + 'static;

    /// Binding name that overrides the provider.
    fn name() -> &'static str {
        type_name::<Self>()
    }

    /// Produce the value.
    fn provide(args: Self::Args) -> impl Future<Output = Result<Provided<Self::Output>>> + Send;
}

// ============================================================================
// Resolver
// ============================================================================

/// Per-call resolution state: bindings, provider cache and scoped resources.
pub struct Resolver {
    bindings: Bindings,
    cache: HashMap<TypeId, Box<dyn Any + Send>>,
    resolving: Vec<TypeId>,
    exits: Vec<(&'static str, Release)>,
}

impl Resolver {
    /// A resolver over `bindings`.
    pub fn new(bindings: Bindings) -> Self {
        Self {
            bindings,
            cache: HashMap::new(),
            resolving: Vec::new(),
            exits: Vec::new(),
        }
    }

    /// The caller's bindings.
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// The value of provider `P`, running it if this call has not yet.
    pub fn provide<P: Provider>(&mut self) -> BoxFuture<'_, Result<P::Output, ResolveError>> {
        Box::pin(async move {
            let id = TypeId::of::<P>();
            if let Some(cached) = self
                .cache
                .get(&id)
                .and_then(|value| value.downcast_ref::<P::Output>())
            {
                return Ok(cached.clone());
            }
            if self.resolving.contains(&id) {
                return Err(ResolveError::Cycle(P::name()));
            }

            self.resolving.push(id);
            let args = <P::Args as Dependency>::resolve(self).await;
            self.resolving.pop();

            let provided = P::provide(args?)
                .await
                .map_err(|source| ResolveError::Provider {
                    name: P::name(),
                    source,
                })?;
            let value = match provided {
                Provided::Value(value) => value,
                Provided::Scoped(value, release) => {
                    tracing::trace!(provider = P::name(), "acquired scoped resource");
                    self.exits.push((P::name(), release));
                    value
                }
            };
            self.cache.insert(id, Box::new(value.clone()));
            Ok::<_, ResolveError>(value)
        })
    }

    /// Release scoped resources in reverse acquisition order.
    ///
    /// A release action that panics is logged and does not prevent the
    /// remaining ones from running.
    pub async fn close(mut self) {
        while let Some((provider, release)) = self.exits.pop() {
            if AssertUnwindSafe(release.run()).catch_unwind().await.is_err() {
                tracing::error!(provider, "release of scoped resource panicked");
            }
        }
    }
}

// ============================================================================
// Dependencies
// ============================================================================

/// A handler parameter resolvable from a [`Resolver`].
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot be resolved as a handler parameter",
    label = "missing `Dependency` implementation",
    note = "Use `Message<P>`, `Depends<P>`, `Bound<T>` or `Option` of those."
)]
pub trait Dependency: Sized + Send + 'static {
    /// Resolve the parameter.
    fn resolve(resolver: &mut Resolver) -> BoxFuture<'_, Result<Self, ResolveError>>;
}

/// The output of provider `P`.
pub struct Depends<P: Provider>(pub P::Output);

impl<P: Provider> Depends<P> {
    /// Consume into the provided value.
    pub fn into_inner(self) -> P::Output {
        self.0
    }
}

impl<P: Provider> Deref for Depends<P> {
    type Target = P::Output;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<P: Provider> Dependency for Depends<P> {
    fn resolve(resolver: &mut Resolver) -> BoxFuture<'_, Result<Self, ResolveError>> {
        Box::pin(async move {
            if let Some(bound) = resolver.bindings.get::<P::Output>(P::name()) {
                return Ok(Depends(bound));
            }
            resolver.provide::<P>().await.map(Depends)
        })
    }
}

/// A value bound by type with [`Bindings::provide`].
#[derive(Debug, Clone)]
pub struct Bound<T>(pub T);

impl<T> Deref for Bound<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: Clone + Send + Sync + 'static> Dependency for Bound<T> {
    fn resolve(resolver: &mut Resolver) -> BoxFuture<'_, Result<Self, ResolveError>> {
        Box::pin(async move {
            resolver
                .bindings
                .get::<T>(type_name::<T>())
                .map(Bound)
                .ok_or_else(|| ResolveError::Unresolvable(type_name::<T>().to_owned()))
        })
    }
}

impl<D: Dependency> Dependency for Option<D> {
    fn resolve(resolver: &mut Resolver) -> BoxFuture<'_, Result<Self, ResolveError>> {
        Box::pin(async move {
            match D::resolve(resolver).await {
                Ok(value) => Ok(Some(value)),
                Err(ResolveError::Unresolvable(_)) => Ok(None),
                Err(err) => Err(err),
            }
        })
    }
}

impl<P: Object> Dependency for Message<P> {
    fn resolve(resolver: &mut Resolver) -> BoxFuture<'_, Result<Self, ResolveError>> {
        Box::pin(async move {
            let arg = resolver.bindings.message_arg();
            resolver
                .bindings
                .get::<Self>(arg)
                .ok_or_else(|| ResolveError::Unresolvable(arg.to_owned()))
        })
    }
}

impl Dependency for () {
    fn resolve(_resolver: &mut Resolver) -> BoxFuture<'_, Result<Self, ResolveError>> {
        Box::pin(async { Ok(()) })
    }
}

macro_rules! impl_dependency_tuple {
    ($($T:ident),+) => {
        impl<$($T: Dependency),+> Dependency for ($($T,)+) {
            #[allow(non_snake_case)]
            fn resolve(resolver: &mut Resolver) -> BoxFuture<'_, Result<Self, ResolveError>> {
                Box::pin(async move {
                    $(
                        let $T = <$T as Dependency>::resolve(&mut *resolver).await?;
                    )+
                    Ok::<_, ResolveError>(($($T,)+))
                })
            }
        }
    };
}

impl_dependency_tuple!(T1);
impl_dependency_tuple!(T1, T2);
impl_dependency_tuple!(T1, T2, T3);
impl_dependency_tuple!(T1, T2, T3, T4);
impl_dependency_tuple!(T1, T2, T3, T4, T5);
impl_dependency_tuple!(T1, T2, T3, T4, T5, T6);
impl_dependency_tuple!(T1, T2, T3, T4, T5, T6, T7);
impl_dependency_tuple!(T1, T2, T3, T4, T5, T6, T7, T8);

// ============================================================================
// Handlers
// ============================================================================

/// An async function callable with resolved parameters `Args`.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not an injectable handler",
    label = "handler must be an async fn returning `Result<_, Error>`",
    note = "Every parameter must implement `Dependency`, at most 8 parameters are supported."
)]
pub trait Injectable<Args>: Send + Sync + 'static {
    /// Success value of the handler.
    type Output: Send + 'static;

    /// Invoke with resolved parameters.
    fn invoke(&self, args: Args) -> impl Future<Output = Result<Self::Output>> + Send;
}

macro_rules! impl_injectable {
    ($($T:ident),*) => {
        impl<F, Fut, R, $($T,)*> Injectable<($($T,)*)> for F
        where
            F: Fn($($T),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<R>> + Send,
            R: Send + 'static,
            $($T: Dependency,)*
        {
            type Output = R;

            #[allow(non_snake_case)]
            fn invoke(&self, args: ($($T,)*)) -> impl Future<Output = Result<R>> + Send {
                let ($($T,)*) = args;
                (self)($($T),*)
            }
        }
    };
}

impl_injectable!();
impl_injectable!(T1);
impl_injectable!(T1, T2);
impl_injectable!(T1, T2, T3);
impl_injectable!(T1, T2, T3, T4);
impl_injectable!(T1, T2, T3, T4, T5);
impl_injectable!(T1, T2, T3, T4, T5, T6);
impl_injectable!(T1, T2, T3, T4, T5, T6, T7);
impl_injectable!(T1, T2, T3, T4, T5, T6, T7, T8);

/// Text of a panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("handler panicked")
    }
}

async fn resolve_and_invoke<H, Args>(handler: &H, resolver: &mut Resolver) -> Result<H::Output>
where
    H: Injectable<Args>,
    Args: Dependency,
{
    let args = Args::resolve(resolver).await?;
    handler.invoke(args).await
}

/// Resolve the parameters of `handler`, call it and release scoped resources.
///
/// Resolution failures become `internal_error`s, except provider errors which
/// are returned as the provider raised them. A panic in a provider or in the
/// handler becomes an `internal_error` once cleanup has run.
pub async fn call_with_dependencies<H, Args>(handler: &H, bindings: Bindings) -> Result<H::Output>
where
    H: Injectable<Args>,
    Args: Dependency,
{
    let mut resolver = Resolver::new(bindings);
    let outcome = AssertUnwindSafe(resolve_and_invoke(handler, &mut resolver))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            tracing::error!(%message, "handler panicked");
            Err(Error::internal().with_debug("message", message))
        });
    resolver.close().await;
    if let Err(err) = &outcome {
        tracing::debug!(code = err.code(), field = err.field(), "handler failed");
    }
    outcome
}
