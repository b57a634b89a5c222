use courier::{
    Bindings, Bound, Depends, Error, ErrorKind, Provided, Provider, Result,
    call_with_dependencies, testing::CallCounter,
};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
struct Pool {
    name: String,
}

struct Database;

impl Provider for Database {
    type Args = (Bound<CallCounter>,);
    type Output = Arc<Pool>;

    async fn provide((Bound(counter),): Self::Args) -> Result<Provided<Arc<Pool>>> {
        counter.hit();
        Ok(Arc::new(Pool {
            name: String::from("primary"),
        })
        .into())
    }
}

struct Users;

impl Provider for Users {
    type Args = (Depends<Database>,);
    type Output = String;

    async fn provide((db,): Self::Args) -> Result<Provided<String>> {
        Ok(Provided::Value(format!("users@{}", db.name)))
    }
}

struct Orders;

impl Provider for Orders {
    type Args = (Depends<Database>,);
    type Output = String;

    async fn provide((db,): Self::Args) -> Result<Provided<String>> {
        Ok(Provided::Value(format!("orders@{}", db.name)))
    }
}

#[tokio::test]
async fn test_shared_provider_runs_once_per_call() {
    async fn handler(users: Depends<Users>, orders: Depends<Orders>) -> Result<String> {
        Ok(format!("{} {}", *users, *orders))
    }

    let counter = CallCounter::new();
    let bindings = Bindings::new().provide(counter.clone());

    let output = call_with_dependencies(&handler, bindings.clone()).await.unwrap();
    assert_eq!(output, "users@primary orders@primary");
    assert_eq!(counter.count(), 1);

    call_with_dependencies(&handler, bindings).await.unwrap();
    assert_eq!(counter.count(), 2);
}

#[tokio::test]
async fn test_override_skips_provider() {
    async fn handler(users: Depends<Users>) -> Result<String> {
        Ok(users.into_inner())
    }

    let counter = CallCounter::new();
    let bindings = Bindings::new()
        .provide(counter.clone())
        .override_provider::<Users>(String::from("fake users"));
    let output = call_with_dependencies(&handler, bindings).await.unwrap();
    assert_eq!(output, "fake users");
    assert_eq!(counter.count(), 0);
}

#[tokio::test]
async fn test_unresolvable_parameter_is_internal() {
    async fn handler(_db: Depends<Database>) -> Result<()> {
        Ok(())
    }

    let err = call_with_dependencies(&handler, Bindings::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.debug().contains_key("message"));
}

type Log = Arc<Mutex<Vec<&'static str>>>;

struct Connection;

impl Provider for Connection {
    type Args = (Bound<Log>,);
    type Output = &'static str;

    async fn provide((Bound(log),): Self::Args) -> Result<Provided<&'static str>> {
        log.lock().unwrap().push("open connection");
        Ok(Provided::scoped("connection", move || async move {
            log.lock().unwrap().push("close connection");
        }))
    }
}

struct Transaction;

impl Provider for Transaction {
    type Args = (Depends<Connection>, Bound<Log>);
    type Output = &'static str;

    async fn provide((_conn, Bound(log)): Self::Args) -> Result<Provided<&'static str>> {
        log.lock().unwrap().push("begin");
        Ok(Provided::scoped("transaction", move || async move {
            log.lock().unwrap().push("end");
        }))
    }
}

#[tokio::test]
async fn test_scoped_resources_release_in_reverse_on_error() {
    async fn handler(_tx: Depends<Transaction>, Bound(log): Bound<Log>) -> Result<()> {
        log.lock().unwrap().push("work");
        Err(Error::conflict())
    }

    let log: Log = Arc::default();
    let err = call_with_dependencies(&handler, Bindings::new().provide(log.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["open connection", "begin", "work", "end", "close connection"]
    );
}

#[tokio::test]
async fn test_named_bindings() {
    async fn handler(region: Option<Bound<String>>) -> Result<String> {
        Ok(region.map_or_else(|| String::from("none"), |Bound(region)| region))
    }

    let output = call_with_dependencies(&handler, Bindings::new()).await.unwrap();
    assert_eq!(output, "none");

    let bindings = Bindings::new().provide(String::from("eu-west"));
    let output = call_with_dependencies(&handler, bindings).await.unwrap();
    assert_eq!(output, "eu-west");
}
