//! End-to-end tests through the HTTP router.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use axum::http::{Method, StatusCode};
use serde_json::{Value, json};
use tiffin_core::Money;
use tiffin_integration_tests::{TestApp, order_body};

fn money(value: &Value) -> Money {
    serde_json::from_value(value.clone()).unwrap()
}

/// Place and confirm an order over HTTP, returning `(order_id, ride_id)`.
async fn confirmed_order(app: &TestApp) -> (i64, i64) {
    let (status, order) = app
        .call(
            Method::POST,
            "/api/orders",
            Some(app.user_principal()),
            Some(order_body(app)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = order["id"].as_i64().unwrap();

    let (status, confirmed) = app
        .call(
            Method::POST,
            &format!("/api/orders/{order_id}/confirm"),
            Some(app.shop_principal()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["order"]["status"], "confirmed");
    (order_id, confirmed["ride"]["id"].as_i64().unwrap())
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::spawn().await;
    let (status, _) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.call(Method::GET, "/health/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_authentication_and_roles() {
    let app = TestApp::spawn().await;

    let (status, body) = app.call(Method::GET, "/api/orders/1", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = app
        .call(
            Method::GET,
            "/api/captain/earnings",
            Some(app.user_principal()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/orders",
            Some(app.captain_principal(0)),
            Some(order_body(&app)),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The socket rejects before upgrading
    let (status, _) = app.call(Method::GET, "/ws", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_order_to_settlement() {
    let app = TestApp::spawn().await;
    let (order_id, ride_id) = confirmed_order(&app).await;
    let ride = format!("/api/rides/{ride_id}");

    // The shop never sees the OTP
    let (_, view) = app
        .call(Method::GET, &ride, Some(app.shop_principal()), None)
        .await;
    assert!(view.get("otp").is_none());

    let (status, outcome) = app
        .call(
            Method::POST,
            &format!("{ride}/dispatch"),
            Some(app.shop_principal()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let offered: Vec<i64> = outcome["candidates"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_i64().unwrap())
        .collect();
    let nearest = i64::from(app.captains[0].id.as_i32());
    let second = i64::from(app.captains[1].id.as_i32());
    assert_eq!(offered, vec![nearest, second]);

    let (status, accepted) = app
        .call(
            Method::POST,
            &format!("{ride}/accept"),
            Some(app.captain_principal(1)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "accepted");
    assert_eq!(accepted["captain_id"], second);

    let (status, _) = app
        .call(
            Method::POST,
            &format!("{ride}/accept"),
            Some(app.captain_principal(0)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, view) = app
        .call(Method::GET, &ride, Some(app.user_principal()), None)
        .await;
    let otp = view["otp"].as_str().unwrap().to_owned();

    let (status, body) = app
        .call(
            Method::POST,
            &format!("{ride}/start"),
            Some(app.captain_principal(1)),
            Some(json!({ "otp": format!("{otp}x") })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("attempts"));

    let (status, started) = app
        .call(
            Method::POST,
            &format!("{ride}/start"),
            Some(app.captain_principal(1)),
            Some(json!({ "otp": otp })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["status"], "started");

    let (status, receipt) = app
        .call(
            Method::POST,
            &format!("{ride}/complete"),
            Some(app.captain_principal(1)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["ride"]["status"], "completed");
    assert_eq!(
        money(&receipt["settlement"]["shop_payout"]),
        Money::from_cents(21_600)
    );
    assert_eq!(
        money(&receipt["settlement"]["captain_earning"]),
        Money::from_cents(7_274)
    );

    let (_, order) = app
        .call(
            Method::GET,
            &format!("/api/orders/{order_id}"),
            Some(app.user_principal()),
            None,
        )
        .await;
    assert_eq!(order["status"], "delivered");
    assert_eq!(order["payment_status"], "paid");

    let (_, balance) = app
        .call(
            Method::GET,
            "/api/shop/balance",
            Some(app.shop_principal()),
            None,
        )
        .await;
    assert_eq!(money(&balance["balance"]), Money::from_cents(21_600));
    assert_eq!(balance["audit"]["consistent"], true);

    let (_, earnings) = app
        .call(
            Method::GET,
            "/api/captain/earnings",
            Some(app.captain_principal(1)),
            None,
        )
        .await;
    assert_eq!(money(&earnings["balance"]), Money::from_cents(7_274));
    assert_eq!(earnings["rides_completed"], 1);
}

#[tokio::test]
async fn test_captain_withdraw_and_user_cancel() {
    let app = TestApp::spawn().await;
    let (order_id, ride_id) = confirmed_order(&app).await;
    let ride = format!("/api/rides/{ride_id}");

    app.call(
        Method::POST,
        &format!("{ride}/dispatch"),
        Some(app.shop_principal()),
        None,
    )
    .await;
    app.call(
        Method::POST,
        &format!("{ride}/accept"),
        Some(app.captain_principal(0)),
        None,
    )
    .await;

    let (status, withdrawn) = app
        .call(
            Method::POST,
            &format!("{ride}/cancel"),
            Some(app.captain_principal(0)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(withdrawn["outcome"], "reopened");
    assert_eq!(withdrawn["ride"]["status"], "requested");
    assert!(withdrawn["ride"]["captain_id"].is_null());

    let (status, cancelled) = app
        .call(
            Method::POST,
            &format!("{ride}/cancel"),
            Some(app.user_principal()),
            Some(json!({ "reason": "ordered by mistake" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["outcome"], "cancelled");
    assert_eq!(cancelled["ride"]["cancel_reason"], "ordered by mistake");

    let (_, order) = app
        .call(
            Method::GET,
            &format!("/api/orders/{order_id}"),
            Some(app.shop_principal()),
            None,
        )
        .await;
    assert_eq!(order["status"], "cancelled");
}

#[tokio::test]
async fn test_captain_availability_and_location() {
    let app = TestApp::spawn().await;
    let captain = Some(app.captain_principal(2));

    let (status, body) = app
        .call(
            Method::PUT,
            "/api/captain/location",
            captain,
            Some(json!({ "lat": 12.98, "lng": 77.60 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["location"]["lat"], 12.98);

    let (status, _) = app
        .call(
            Method::PUT,
            "/api/captain/location",
            captain,
            Some(json!({ "lat": 120.0, "lng": 77.60 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = app
        .call(
            Method::PUT,
            "/api/captain/availability",
            captain,
            Some(json!({ "availability": "offline" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["availability"], "offline");

    let (status, _) = app
        .call(
            Method::PUT,
            "/api/captain/availability",
            captain,
            Some(json!({ "availability": "on_ride" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_shop_payouts() {
    let app = TestApp::spawn().await;

    let (status, _) = app
        .call(
            Method::POST,
            "/api/shop/payouts",
            Some(app.shop_principal()),
            Some(json!({ "amount": "10.00" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/shop/payouts",
            Some(app.shop_principal()),
            Some(json!({ "amount": "-5.00" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, ledger) = app
        .call(
            Method::GET,
            "/api/shop/ledger?limit=10",
            Some(app.shop_principal()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ledger, json!([]));
}
