pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// Returns an `InvalidArgument` error from the enclosing function when the
/// given condition does not hold.
#[macro_export]
macro_rules! verify_arg {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::result::verify_arg(result, stringify!($name), stringify!($expr))?;
    }};
}

#[inline]
pub fn verify_arg(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_arg(name, condition)
    }
}

#[cold]
pub fn invalid_arg(name: &str, condition: &str) -> Result<()> {
    Err(crate::error::ErrorKind::InvalidArgument {
        name: name.to_string(),
        message: condition.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use crate::ErrorKind;

    fn check_limit(limit: usize) -> crate::Result<usize> {
        verify_arg!(limit, limit >= 1);
        Ok(limit)
    }

    #[test]
    fn test_verify_arg_macro() {
        assert_eq!(check_limit(3).unwrap(), 3);
        let err = check_limit(0).unwrap_err();
        match err.kind() {
            ErrorKind::InvalidArgument { name, message } => {
                assert_eq!(name, "limit");
                assert_eq!(message, "limit >= 1");
            }
            other => panic!("unexpected error kind: {other:?}"),
        }
    }
}
