/// Fallible conversion that has to await I/O, such as hashing a file or
/// loading a saved snapshot from disk.
///
/// ```rust,ignore
/// let hash = ContentHash::async_try_from(Path::new("notes.txt")).await?;
/// ```
pub trait AsyncTryFrom<T>: Sized {
    type Error;

    async fn async_try_from(value: T) -> Result<Self, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EvenNumber(u32);

    impl AsyncTryFrom<&str> for EvenNumber {
        type Error = String;

        async fn async_try_from(value: &str) -> Result<Self, Self::Error> {
            match value.parse::<u32>() {
                Ok(number) if number % 2 == 0 => Ok(EvenNumber(number)),
                Ok(number) => Err(format!("{number} is odd")),
                Err(error) => Err(error.to_string()),
            }
        }
    }

    #[test]
    fn conversion_succeeds() {
        futures::executor::block_on(async {
            let number = EvenNumber::async_try_from("42").await.unwrap();
            assert_eq!(number.0, 42);
        });
    }

    #[test]
    fn conversion_reports_its_error() {
        futures::executor::block_on(async {
            let result = EvenNumber::async_try_from("7").await;
            assert_eq!(result.err(), Some("7 is odd".to_string()));
        });
    }
}
