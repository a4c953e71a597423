// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Black-box tests against the control API (spec.md §6, §8): each test
//! drives the real `axum` router over in-process requests, exercising the
//! registry through HTTP the way the test harness described in spec.md §1
//! would. Proxies bind on an ephemeral port (`0`) and target a host that is
//! never actually dialed by these tests, so there's no dependency on a real
//! upstream.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use fault_proxy::http_api;
use fault_proxy::registry::SimulationRegistry;
use http_body_util::BodyExt;
use tower::ServiceExt;

fn test_router() -> axum::Router {
    let registry = Arc::new(SimulationRegistry::new(
        "127.0.0.1".to_string(),
        0,
        "example.invalid".to_string(),
        443,
    ));
    http_api::build_router(registry)
}

fn post(uri: String) -> Request<Body> {
    Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn lists_all_twelve_fault_names() {
    let router = test_router();
    let response = router
        .oneshot(Request::builder().uri("/faults").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let names: Vec<String> = serde_json::from_slice(&body).unwrap();
    assert_eq!(names.len(), 12);
    assert!(names.contains(&"DisconnectAndSuspend".to_string()));
}

#[tokio::test]
async fn creating_simulation_for_unknown_fault_is_not_found() {
    let router = test_router();
    let response = router.oneshot(post("/faults/NotARealFault/simulation".into())).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn full_lifecycle_round_trip_succeeds_and_clean_up_is_idempotent() {
    let router = test_router();

    let create_response = router
        .clone()
        .oneshot(post("/faults/NullTransportFault/simulation".into()))
        .await
        .unwrap();
    assert_eq!(create_response.status(), StatusCode::OK);
    let body = create_response.into_body().collect().await.unwrap().to_bytes();
    let descriptor: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let id = descriptor["id"].as_str().unwrap().to_string();
    assert_eq!(descriptor["name"], "NullTransportFault");
    assert_eq!(descriptor["type"], "Nonfatal");
    assert!(descriptor["proxy"]["listenPort"].is_number());

    let enable_response = router
        .clone()
        .oneshot(post(format!("/fault-simulations/{id}/enable")))
        .await
        .unwrap();
    assert_eq!(enable_response.status(), StatusCode::OK);

    let resolve_response = router
        .clone()
        .oneshot(post(format!("/fault-simulations/{id}/resolve")))
        .await
        .unwrap();
    assert_eq!(resolve_response.status(), StatusCode::OK);

    let clean_up_once = router
        .clone()
        .oneshot(post(format!("/fault-simulations/{id}/clean-up")))
        .await
        .unwrap();
    assert_eq!(clean_up_once.status(), StatusCode::OK);

    // spec.md §8 "Lifecycle idempotence": cleanUp twice still succeeds.
    let clean_up_twice = router
        .oneshot(post(format!("/fault-simulations/{id}/clean-up")))
        .await
        .unwrap();
    assert_eq!(clean_up_twice.status(), StatusCode::OK);
}

#[tokio::test]
async fn lifecycle_calls_on_unknown_id_are_not_found() {
    let router = test_router();
    let response = router
        .oneshot(post("/fault-simulations/not-a-real-id/enable".into()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn resolving_before_enabling_is_a_conflict() {
    let router = test_router();

    let create_response = router
        .clone()
        .oneshot(post("/faults/NullApplicationLayerFault/simulation".into()))
        .await
        .unwrap();
    let body = create_response.into_body().collect().await.unwrap().to_bytes();
    let descriptor: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let id = descriptor["id"].as_str().unwrap().to_string();

    let resolve_response = router
        .oneshot(post(format!("/fault-simulations/{id}/resolve")))
        .await
        .unwrap();
    assert_eq!(resolve_response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn duplicate_creation_requests_yield_distinct_ids() {
    let router = test_router();

    let first = router
        .clone()
        .oneshot(post("/faults/NullTransportFault/simulation".into()))
        .await
        .unwrap();
    let first_body = first.into_body().collect().await.unwrap().to_bytes();
    let first_descriptor: serde_json::Value = serde_json::from_slice(&first_body).unwrap();

    let second = router
        .oneshot(post("/faults/NullTransportFault/simulation".into()))
        .await
        .unwrap();
    let second_body = second.into_body().collect().await.unwrap().to_bytes();
    let second_descriptor: serde_json::Value = serde_json::from_slice(&second_body).unwrap();

    assert_ne!(first_descriptor["id"], second_descriptor["id"]);
}
