//! Settlement outcome carried through promise chains.
//!
//! A [`PromiseResult`] is the payload a producer hands to a consumer when a
//! promise settles: either a value of type `T` or an error of type `E`.
//! It is deliberately not `std::result::Result` - the runtime moves these
//! through type-erased chain links and the distinct name keeps the two
//! worlds from blurring at call sites - but it converts losslessly in both
//! directions.
//!
//! Unit promises use the ordinary `PromiseResult<(), E>` instantiation;
//! `Value(())` is the settled-ok arm.

/// The outcome of a settled promise: a value or an error.
///
/// Once constructed, an arm is immutable; there are no `&mut` accessors.
/// Slots that may be unfilled (a not-yet-settled payload, an awaiter's
/// result slot) are `Option<PromiseResult<T, E>>`, so an "empty" arm is
/// never observable.
///
/// # Examples
///
/// ```
/// use core_types::PromiseResult;
///
/// let ok: PromiseResult<i32, String> = PromiseResult::value(7);
/// let err: PromiseResult<i32, String> = PromiseResult::error("boom".into());
///
/// assert!(ok.is_value());
/// assert!(err.is_error());
/// assert_eq!(ok.value_or(0), 7);
/// assert_eq!(err.error_or("fine".into()), "boom");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromiseResult<T, E> {
    /// The promise resolved with a value.
    Value(T),
    /// The promise rejected with an error.
    Error(E),
}

impl<T, E> PromiseResult<T, E> {
    /// Constructs the value arm.
    pub fn value(value: T) -> Self {
        PromiseResult::Value(value)
    }

    /// Constructs the error arm.
    pub fn error(error: E) -> Self {
        PromiseResult::Error(error)
    }

    /// Returns true if this result carries a value.
    pub fn is_value(&self) -> bool {
        matches!(self, PromiseResult::Value(_))
    }

    /// Returns true if this result carries an error.
    pub fn is_error(&self) -> bool {
        matches!(self, PromiseResult::Error(_))
    }

    /// Moves the value out.
    ///
    /// # Panics
    ///
    /// Panics if this result holds the error arm.
    pub fn into_value(self) -> T {
        match self {
            PromiseResult::Value(v) => v,
            PromiseResult::Error(_) => panic!("PromiseResult::into_value called on the error arm"),
        }
    }

    /// Moves the error out.
    ///
    /// # Panics
    ///
    /// Panics if this result holds the value arm.
    pub fn into_error(self) -> E {
        match self {
            PromiseResult::Value(_) => panic!("PromiseResult::into_error called on the value arm"),
            PromiseResult::Error(e) => e,
        }
    }

    /// Moves the value out, or returns `default` if this is the error arm.
    pub fn value_or(self, default: T) -> T {
        match self {
            PromiseResult::Value(v) => v,
            PromiseResult::Error(_) => default,
        }
    }

    /// Moves the error out, or returns `default` if this is the value arm.
    pub fn error_or(self, default: E) -> E {
        match self {
            PromiseResult::Value(_) => default,
            PromiseResult::Error(e) => e,
        }
    }

    /// Borrows the value, if present.
    pub fn value_ref(&self) -> Option<&T> {
        match self {
            PromiseResult::Value(v) => Some(v),
            PromiseResult::Error(_) => None,
        }
    }

    /// Borrows the error, if present.
    pub fn error_ref(&self) -> Option<&E> {
        match self {
            PromiseResult::Value(_) => None,
            PromiseResult::Error(e) => Some(e),
        }
    }

    /// Maps the value arm, leaving the error arm untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PromiseResult<U, E> {
        match self {
            PromiseResult::Value(v) => PromiseResult::Value(f(v)),
            PromiseResult::Error(e) => PromiseResult::Error(e),
        }
    }

    /// Maps the error arm, leaving the value arm untouched.
    pub fn map_err<F>(self, f: impl FnOnce(E) -> F) -> PromiseResult<T, F> {
        match self {
            PromiseResult::Value(v) => PromiseResult::Value(v),
            PromiseResult::Error(e) => PromiseResult::Error(f(e)),
        }
    }
}

impl<T, E> From<PromiseResult<T, E>> for Result<T, E> {
    fn from(r: PromiseResult<T, E>) -> Self {
        match r {
            PromiseResult::Value(v) => Ok(v),
            PromiseResult::Error(e) => Err(e),
        }
    }
}

impl<T, E> From<Result<T, E>> for PromiseResult<T, E> {
    fn from(r: Result<T, E>) -> Self {
        match r {
            Ok(v) => PromiseResult::Value(v),
            Err(e) => PromiseResult::Error(e),
        }
    }
}
