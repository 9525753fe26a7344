/// A type alias for `anyhow::Error`, representing any error type.
///
/// Handlers and middleware use this at their boundary; structured errors
/// (trie validation, body misuse, close codes) are `thiserror` enums in
/// their own modules and convert into this.
pub type AnyError = anyhow::Error;

/// A type alias for `Result<T, E>` where `E` defaults to [`AnyError`].
pub type AnyResult<T, E = AnyError> = std::result::Result<T, E>;

#[macro_export]
macro_rules! bail_into {
    ($msg:literal $(,)?) => {
        return Err(::anyhow::anyhow!($msg).into())
    };
    ($err:expr $(,)?) => {
        return Err(::anyhow::anyhow!($err).into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err(::anyhow::anyhow!($fmt, $($arg)*).into())
    };
}
