//! Declarative macros for ergonomic effect construction
//!
//! These macros reduce boilerplate when a reducer returns an async
//! computation or schedules an action for later.

/// Create an `Effect::Future` from an async block body
///
/// The body must evaluate to `Option<Action>`; `Some` is fed back into the
/// reducer by the runtime.
///
/// # Example
///
/// ```rust,ignore
/// use turnos_core::async_effect;
///
/// async_effect! {
///     let _ = transport.broadcast(message).await;
///     None
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

/// Create an `Effect::Delay` for scheduling delayed actions
///
/// # Example
///
/// ```rust,ignore
/// use turnos_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_secs(5),
///     action: SessionAction::NotificationExpired { id: 3 }
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}
