use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::timeout;

use loadstone::client::DataClient;
use loadstone::error::DataError;
use loadstone::mutation::{LocalMutation, Mutation, MutationOptions};
use loadstone::observer::{LocalMutateOptions, MutationState};
use loadstone::query::LocalQuery;
use loadstone::store::mock::MockStore;

fn client() -> DataClient {
    DataClient::new(Arc::new(MockStore::new()))
}

/// Mutation that echoes its `name` argument, rejecting when it is missing.
fn rename_mutation() -> Mutation {
    Mutation::new("RenameItem", |args, _ctx| async move {
        match args.as_ref().and_then(|a| a.get("name")) {
            Some(name) => Ok(json!({ "id": 1, "name": name })),
            None => Err(DataError::request("bad input")),
        }
    })
}

async fn wait_until(
    rx: &mut watch::Receiver<MutationState>,
    mut pred: impl FnMut(&MutationState) -> bool,
) -> MutationState {
    timeout(Duration::from_secs(1), async {
        loop {
            {
                let state = rx.borrow_and_update();
                if pred(&state) {
                    return state.clone();
                }
            }
            rx.changed().await.expect("observer dropped");
        }
    })
    .await
    .expect("state not reached within timeout")
}

#[tokio::test]
async fn mutation_success_settles_with_data() {
    let client = client();
    let observer = client.run_mutation(&rename_mutation(), MutationOptions::new());

    let initial = observer.state();
    assert!(!initial.called);
    assert!(!initial.loading);

    observer.mutate(MutationOptions::new().arguments(json!({ "name": "draft" })));
    let mut rx = observer.watch();
    let state = wait_until(&mut rx, |s| s.called && !s.loading).await;
    assert_eq!(state.data, Some(json!({ "id": 1, "name": "draft" })));
    assert!(state.error.is_none());
}

#[tokio::test]
async fn mutation_failure_settles_with_error() {
    let client = client();
    let observer = client.run_mutation(&rename_mutation(), MutationOptions::new());

    observer.mutate(MutationOptions::new());
    let mut rx = observer.watch();
    let state = wait_until(&mut rx, |s| s.called && !s.loading).await;
    assert_eq!(
        state,
        MutationState {
            loading: false,
            called: true,
            error: Some(DataError::request("bad input")),
            data: None,
        }
    );
}

#[tokio::test]
async fn call_site_arguments_override_observer_options() {
    let client = client();
    let observer = client.run_mutation(
        &rename_mutation(),
        MutationOptions::new().arguments(json!({ "name": "base" })),
    );

    observer.mutate(MutationOptions::new().arguments(json!({ "name": "call" })));
    let mut rx = observer.watch();
    let state = wait_until(&mut rx, |s| s.called).await;
    assert_eq!(state.data, Some(json!({ "id": 1, "name": "call" })));
}

#[tokio::test]
async fn called_stays_true_across_a_second_request() {
    let client = client();
    let slow = Mutation::new("SlowRename", |_args, _ctx| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Value::Null)
    });
    let observer = client.run_mutation(&slow, MutationOptions::new());
    observer.mutate(MutationOptions::new());
    let mut rx = observer.watch();
    wait_until(&mut rx, |s| s.called).await;

    // Restart: loading again, settlement cleared, `called` untouched.
    observer.mutate(MutationOptions::new());
    let state = observer.state();
    assert!(state.loading);
    assert!(state.called);
    assert!(state.data.is_none());
    assert!(state.error.is_none());
}

#[tokio::test]
async fn optimistic_response_is_visible_until_the_effect_settles() {
    let client = client();
    let slow = Mutation::new("SlowRename", |_args, _ctx| async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(json!({ "id": 1, "name": "saved" }))
    });
    let observer = client.run_mutation(&slow, MutationOptions::new());

    observer.mutate(
        MutationOptions::new().optimistic_response(json!({ "id": 1, "name": "provisional" })),
    );

    // The provisional result shows up at request time, before settlement.
    let state = observer.state();
    assert!(state.loading);
    assert_eq!(state.data, Some(json!({ "id": 1, "name": "provisional" })));

    let mut rx = observer.watch();
    let state = wait_until(&mut rx, |s| !s.loading).await;
    assert!(state.called);
    assert_eq!(state.data, Some(json!({ "id": 1, "name": "saved" })));
}

#[tokio::test]
async fn unmount_suppresses_the_settlement() {
    let client = client();
    let slow = Mutation::new("SlowRename", |_args, _ctx| async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(json!("done"))
    });
    let observer = client.run_mutation(&slow, MutationOptions::new());

    observer.mutate(MutationOptions::new());
    assert!(observer.state().loading);
    observer.unmount();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let state = observer.state();
    assert!(state.loading);
    assert!(!state.called);
    assert!(state.data.is_none());
}

#[tokio::test]
async fn local_mutation_updates_local_queries_synchronously() {
    let client = client();
    let counter = client.run_local_query(&LocalQuery::new("Counter").with_initial(json!(0)));
    assert_eq!(counter.data(), Some(json!(0)));

    let set_counter = LocalMutation::new("SetCounter", |state, input| {
        state.insert("Counter".into(), input.cloned().unwrap_or(Value::Null));
    });
    let observer = client.run_local_mutation(&set_counter);

    let result = observer.mutate(LocalMutateOptions::new().input(json!(5)).sync_mode(true));
    assert_eq!(result, Ok(()));
    assert_eq!(counter.data(), Some(json!(5)));

    let state = observer.state();
    assert!(!state.loading);
    assert!(state.called);
    assert!(state.error.is_none());
}

#[tokio::test]
async fn local_mutation_validation_failure_is_returned_and_observed() {
    let client = client();
    let guarded = LocalMutation::new("SetFlag", |state, input| {
        state.insert("Flag".into(), input.cloned().unwrap_or(Value::Null));
    })
    .with_after_query_updates(|input| match input {
        Some(Value::Bool(_)) => Ok(()),
        _ => Err(DataError::local_mutation("flag must be a boolean")),
    });
    let observer = client.run_local_mutation(&guarded);

    let result = observer.mutate(LocalMutateOptions::new().input(json!("nope")).sync_mode(true));
    assert_eq!(
        result,
        Err(DataError::local_mutation("flag must be a boolean"))
    );

    let state = observer.state();
    assert!(!state.loading);
    assert!(state.called);
    assert_eq!(state.error, Some(DataError::local_mutation("flag must be a boolean")));
}
