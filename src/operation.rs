use async_trait::async_trait;
use std::{fmt::Display, future::Future};

/// Represents some action whose result can be cached.
///
/// The action has one associated type called [`Value`](Operation::Value). This is the data that
/// the action returns, and that a [`FetchCache`](crate::FetchCache) stores so that later requests
/// with the same dependencies can reuse it.
///
/// The action can be anything, but typically is a network request and the value is the decoded
/// response. Errors only need to be displayable: the cache keeps their message, not the error.
#[async_trait(?Send)]
pub trait Operation {
    type Value: Clone + 'static;
    type Error: Display + 'static;

    async fn send(&self) -> Result<Self::Value, Self::Error>;
}

/// Operation backed by a closure, see [`operation_fn`].
#[derive(Clone, Copy, Debug)]
pub struct FnOperation<F>(F);

/// Turn a closure returning a future into an [`Operation`].
///
/// The closure is called once per invocation, when the returned request is first polled.
pub fn operation_fn<F>(function: F) -> FnOperation<F> {
    FnOperation(function)
}

#[async_trait(?Send)]
impl<F, Fut, V, E> Operation for FnOperation<F>
where
    F: Fn() -> Fut + 'static,
    Fut: Future<Output = Result<V, E>> + 'static,
    V: Clone + 'static,
    E: Display + 'static,
{
    type Value = V;
    type Error = E;

    async fn send(&self) -> Result<V, E> {
        (self.0)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::{cell::Cell, rc::Rc};

    struct Orders {
        page: u32,
    }

    #[async_trait(?Send)]
    impl Operation for Orders {
        type Value = Vec<String>;
        type Error = String;

        async fn send(&self) -> Result<Self::Value, Self::Error> {
            match self.page {
                0 => Err("page must be positive".into()),
                page => Ok(vec![format!("order-{page}")]),
            }
        }
    }

    #[test]
    fn operation_struct() {
        assert_eq!(block_on(Orders { page: 2 }.send()), Ok(vec!["order-2".to_string()]));
        assert!(block_on(Orders { page: 0 }.send()).is_err());
    }

    #[test]
    fn operation_fn_called_per_send() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let operation = operation_fn(move || {
            counter.set(counter.get() + 1);
            let value = counter.get();
            async move { Ok::<_, String>(value) }
        });
        assert_eq!(block_on(operation.send()), Ok(1));
        assert_eq!(block_on(operation.send()), Ok(2));
        assert_eq!(calls.get(), 2);
    }
}
