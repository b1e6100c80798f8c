use crate::error::Cause;

/// The outcome of one contribution to an aggregate, captured as a value.
///
/// Fan-in combinators that hand out `Produced<T>` instead of `T` let the
/// caller see exactly which contributions failed, without the failure of one
/// element voiding the whole aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Produced<T> {
    Succeeded(T),
    Failed(Cause),
}

impl<T> Produced<T> {
    pub fn successful(value: T) -> Self {
        Produced::Succeeded(value)
    }

    pub fn failed(cause: impl Into<Cause>) -> Self {
        Produced::Failed(cause.into())
    }

    /// Returns the value, or the cause of the failure.
    pub fn get(&self) -> Result<&T, &Cause> {
        match self {
            Produced::Succeeded(value) => Ok(value),
            Produced::Failed(cause) => Err(cause),
        }
    }

    pub fn into_result(self) -> Result<T, Cause> {
        self.into()
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Produced::Succeeded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Produced::Failed(_))
    }
}

impl<T> From<Result<T, Cause>> for Produced<T> {
    fn from(result: Result<T, Cause>) -> Self {
        match result {
            Ok(value) => Produced::Succeeded(value),
            Err(cause) => Produced::Failed(cause),
        }
    }
}

impl<T> From<Produced<T>> for Result<T, Cause> {
    fn from(produced: Produced<T>) -> Self {
        match produced {
            Produced::Succeeded(value) => Ok(value),
            Produced::Failed(cause) => Err(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get() {
        let ok = Produced::successful(7);
        assert_eq!(ok.get(), Ok(&7));
        assert!(ok.is_succeeded());

        let cause = Cause::msg("nope");
        let failed: Produced<i32> = Produced::failed(cause.clone());
        assert!(failed.is_failed());
        assert!(failed.get().unwrap_err().ptr_eq(&cause));
    }

    #[test]
    fn test_equality() {
        let cause = Cause::msg("nope");
        assert_eq!(Produced::<u8>::failed(cause.clone()), Produced::failed(cause));
        assert_ne!(
            Produced::<u8>::failed(Cause::msg("a")),
            Produced::failed(Cause::msg("a"))
        );
        assert_eq!(Produced::successful("x"), Produced::successful("x"));
    }
}
