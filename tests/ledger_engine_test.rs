mod common;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use common::{movement, transfer, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use stock_ledger::{
    entities::stock_movement::MovementType,
    errors::ServiceError,
    events::Event,
    services::{
        catalog::CreateProduct,
        effects::MAX_AMOUNT,
        ledger_engine::{MovementFilter, MovementRequest},
    },
};
use uuid::Uuid;

#[tokio::test]
async fn balances_equal_replayed_ledger() {
    let app = TestApp::new().await;
    let w1 = app.warehouse("W1").await;
    let w2 = app.warehouse("W2").await;
    let p = app.product("Bolt").await;
    let q = app.product("Nut").await;

    let steps = vec![
        movement(MovementType::In, w1, p, dec!(100)),
        movement(MovementType::In, w1, q, dec!(7)),
        movement(MovementType::Out, w1, p, dec!(30)),
        transfer(w1, w2, p, dec!(25)),
        movement(MovementType::Adjustment, w2, p, dec!(-5)),
        movement(MovementType::Adjustment, w1, q, dec!(3)),
        movement(MovementType::Out, w2, p, dec!(20)),
    ];
    for step in steps {
        app.apply(step).await.expect("movement applies");
    }

    assert_eq!(app.balance(w1, p).await, dec!(45));
    assert_eq!(app.balance(w2, p).await, dec!(0));
    assert_eq!(app.balance(w1, q).await, dec!(10));

    let report = app.state.reports.consistency_check().await.unwrap();
    assert!(report.consistent, "mismatches: {:?}", report.mismatches);
    assert_eq!(report.movements_replayed, 7);
    assert_eq!(report.balances_checked, 3);
}

#[tokio::test]
async fn deleting_a_movement_restores_prior_balances() {
    let app = TestApp::new().await;
    let w1 = app.warehouse("W1").await;
    let w2 = app.warehouse("W2").await;
    let p = app.product("Bolt").await;
    app.apply(movement(MovementType::In, w1, p, dec!(40)))
        .await
        .unwrap();

    for request in [
        movement(MovementType::In, w1, p, dec!(12)),
        movement(MovementType::Out, w1, p, dec!(15)),
        transfer(w1, w2, p, dec!(10)),
        movement(MovementType::Adjustment, w1, p, dec!(-4)),
        movement(MovementType::Adjustment, w1, p, dec!(6)),
    ] {
        let applied = app.apply(request).await.unwrap();
        app.state
            .engine
            .delete(applied.movement.id, None)
            .await
            .expect("reversal succeeds");
        assert_eq!(app.balance(w1, p).await, dec!(40));
        assert_eq!(app.balance(w2, p).await, dec!(0));
    }
}

#[tokio::test]
async fn out_beyond_balance_fails_and_changes_nothing() {
    let app = TestApp::new().await;
    let w = app.warehouse("W1").await;
    let p = app.product("Bolt").await;
    app.apply(movement(MovementType::In, w, p, dec!(10)))
        .await
        .unwrap();

    let result = app.apply(movement(MovementType::Out, w, p, dec!(11))).await;
    assert_matches!(
        result,
        Err(ServiceError::InsufficientStock(msg)) if msg.starts_with("Insufficient stock.")
    );
    assert_eq!(app.balance(w, p).await, dec!(10));

    let (movements, total) = app
        .state
        .engine
        .list(&MovementFilter::default(), 1, 50)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(movements[0].movement_type, MovementType::In);
}

#[tokio::test]
async fn transfer_moves_stock_or_nothing() {
    let app = TestApp::new().await;
    let a = app.warehouse("A").await;
    let b = app.warehouse("B").await;
    let p = app.product("Bolt").await;
    app.apply(movement(MovementType::In, a, p, dec!(20)))
        .await
        .unwrap();
    app.apply(movement(MovementType::In, b, p, dec!(5)))
        .await
        .unwrap();

    let applied = app.apply(transfer(a, b, p, dec!(20))).await.unwrap();
    assert_eq!(app.balance(a, p).await, dec!(0));
    assert_eq!(app.balance(b, p).await, dec!(25));
    assert_eq!(applied.balances.len(), 2);

    let result = app.apply(transfer(a, b, p, dec!(1))).await;
    assert_matches!(
        result,
        Err(ServiceError::InsufficientStock(msg)) if msg.contains("source warehouse")
    );
    assert_eq!(app.balance(a, p).await, dec!(0));
    assert_eq!(app.balance(b, p).await, dec!(25));
}

#[tokio::test]
async fn negative_adjustment_is_a_signed_delta() {
    let app = TestApp::new().await;
    let w = app.warehouse("W1").await;
    let p = app.product("Bolt").await;
    let q = app.product("Nut").await;
    app.apply(movement(MovementType::In, w, p, dec!(100)))
        .await
        .unwrap();
    app.apply(movement(MovementType::In, w, q, dec!(3)))
        .await
        .unwrap();

    app.apply(movement(MovementType::Adjustment, w, p, dec!(-5)))
        .await
        .unwrap();
    assert_eq!(app.balance(w, p).await, dec!(95));

    let result = app
        .apply(movement(MovementType::Adjustment, w, q, dec!(-5)))
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));
    assert_eq!(app.balance(w, q).await, dec!(3));
}

#[tokio::test]
async fn edit_then_delete_walkthrough() {
    let app = TestApp::new().await;
    let w = app.warehouse("W").await;
    let p = app.product("P").await;
    assert_eq!(app.balance(w, p).await, dec!(0));

    app.apply(movement(MovementType::In, w, p, dec!(50)))
        .await
        .unwrap();
    assert_eq!(app.balance(w, p).await, dec!(50));

    let out = app
        .apply(movement(MovementType::Out, w, p, dec!(20)))
        .await
        .unwrap();
    assert_eq!(app.balance(w, p).await, dec!(30));

    let edited = app
        .state
        .engine
        .update(
            out.movement.id,
            movement(MovementType::Out, w, p, dec!(40)),
            None,
        )
        .await
        .unwrap();
    assert_eq!(app.balance(w, p).await, dec!(10));
    assert_eq!(edited.previous.quantity, dec!(20));
    assert_eq!(edited.movement.id, out.movement.id);
    assert_eq!(edited.movement.quantity, dec!(40));
    assert_eq!(edited.balances.len(), 1);
    assert_eq!(edited.balances[0].before, dec!(30));
    assert_eq!(edited.balances[0].after, dec!(10));

    app.state
        .engine
        .delete(out.movement.id, None)
        .await
        .unwrap();
    assert_eq!(app.balance(w, p).await, dec!(50));
    assert_matches!(
        app.state.engine.get(out.movement.id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn reversal_conflict_leaves_movement_untouched() {
    let app = TestApp::new().await;
    let w = app.warehouse("W").await;
    let p = app.product("P").await;
    let receipt = app
        .apply(movement(MovementType::In, w, p, dec!(10)))
        .await
        .unwrap();
    app.apply(movement(MovementType::Out, w, p, dec!(8)))
        .await
        .unwrap();

    let result = app.state.engine.delete(receipt.movement.id, None).await;
    assert_matches!(
        result,
        Err(ServiceError::InsufficientStock(msg)) if msg.contains("insufficient stock to remove")
    );

    let result = app
        .state
        .engine
        .update(
            receipt.movement.id,
            movement(MovementType::In, w, p, dec!(1)),
            None,
        )
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    assert_eq!(app.balance(w, p).await, dec!(2));
    let stored = app.state.engine.get(receipt.movement.id).await.unwrap();
    assert_eq!(stored.quantity, dec!(10));
}

#[tokio::test]
async fn transfer_reversal_needs_stock_at_target() {
    let app = TestApp::new().await;
    let a = app.warehouse("A").await;
    let b = app.warehouse("B").await;
    let p = app.product("P").await;
    app.apply(movement(MovementType::In, a, p, dec!(10)))
        .await
        .unwrap();
    let moved = app.apply(transfer(a, b, p, dec!(10))).await.unwrap();
    app.apply(movement(MovementType::Out, b, p, dec!(6)))
        .await
        .unwrap();

    let result = app.state.engine.delete(moved.movement.id, None).await;
    assert_matches!(
        result,
        Err(ServiceError::InsufficientStock(msg)) if msg.contains("target warehouse")
    );
    assert_eq!(app.balance(a, p).await, dec!(0));
    assert_eq!(app.balance(b, p).await, dec!(4));
}

#[tokio::test]
async fn failed_edit_keeps_old_effect() {
    let app = TestApp::new().await;
    let w = app.warehouse("W").await;
    let p = app.product("P").await;
    app.apply(movement(MovementType::In, w, p, dec!(30)))
        .await
        .unwrap();
    let out = app
        .apply(movement(MovementType::Out, w, p, dec!(10)))
        .await
        .unwrap();

    // Reversal succeeds (30) but the new out of 31 does not fit
    let result = app
        .state
        .engine
        .update(
            out.movement.id,
            movement(MovementType::Out, w, p, dec!(31)),
            None,
        )
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));
    assert_eq!(app.balance(w, p).await, dec!(20));
    assert_eq!(
        app.state.engine.get(out.movement.id).await.unwrap().quantity,
        dec!(10)
    );
}

#[tokio::test]
async fn untracked_products_record_movements_only() {
    let app = TestApp::new().await;
    let w = app.warehouse("W").await;
    let service = app
        .product_with(CreateProduct {
            name: "Installation".into(),
            track_quantity: Some(false),
            ..Default::default()
        })
        .await;

    let applied = app
        .apply(movement(MovementType::Out, w, service, dec!(3)))
        .await
        .unwrap();
    assert!(applied.balances.is_empty());
    assert_eq!(app.balance(w, service).await, dec!(0));

    let deleted = app
        .state
        .engine
        .delete(applied.movement.id, None)
        .await
        .unwrap();
    assert!(deleted.balances.is_empty());
}

#[tokio::test]
async fn unit_cost_and_user_defaults() {
    let app = TestApp::new().await;
    let w = app.warehouse("W").await;
    let p = app.product("P").await;
    let user = Uuid::new_v4();

    let applied = app
        .state
        .engine
        .apply(movement(MovementType::In, w, p, dec!(1)), Some(user))
        .await
        .unwrap();
    assert_eq!(applied.movement.unit_cost, Some(dec!(2)));
    assert_eq!(applied.movement.user_id, Some(user));

    let mut priced = movement(MovementType::In, w, p, dec!(1));
    priced.unit_cost = Some(dec!(3.5));
    let applied = app.apply(priced).await.unwrap();
    assert_eq!(applied.movement.unit_cost, Some(dec!(3.5)));
}

#[tokio::test]
async fn unknown_references_are_rejected() {
    let app = TestApp::new().await;
    let w = app.warehouse("W").await;
    let p = app.product("P").await;

    assert_matches!(
        app.apply(movement(MovementType::In, w, Uuid::new_v4(), dec!(1)))
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        app.apply(movement(MovementType::In, Uuid::new_v4(), p, dec!(1)))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        app.state.engine.delete(Uuid::new_v4(), None).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn invalid_requests_never_reach_storage() {
    let app = TestApp::new().await;
    let w = app.warehouse("W").await;
    let p = app.product("P").await;

    assert_matches!(
        app.apply(transfer(w, w, p, dec!(1))).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        app.apply(movement(MovementType::Out, w, p, dec!(-2))).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_eq!(app.balance(w, p).await, Decimal::ZERO);
}

#[tokio::test]
async fn list_filters_by_warehouse_type_and_business_day() {
    let app = TestApp::new().await;
    let a = app.warehouse("A").await;
    let b = app.warehouse("B").await;
    let p = app.product("P").await;

    // 2024-03-01 22:30 UTC is 2024-03-02 01:30 in the default +03:00 zone
    let mut late = movement(MovementType::In, a, p, dec!(10));
    late.movement_date = Some(Utc.with_ymd_and_hms(2024, 3, 1, 22, 30, 0).unwrap());
    app.apply(late).await.unwrap();

    let mut early = transfer(a, b, p, dec!(4));
    early.movement_date = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
    // Transfer dated earlier than the receipt still applies against the current balance
    app.apply(early).await.unwrap();

    let (rows, total) = app
        .state
        .engine
        .list(
            &MovementFilter {
                warehouse_id: Some(a),
                ..Default::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(total, 2, "source warehouse matches transfers");
    assert_eq!(rows[0].movement_type, MovementType::In, "newest first");

    let (_, total) = app
        .state
        .engine
        .list(
            &MovementFilter {
                warehouse_id: Some(b),
                movement_type: Some(MovementType::Transfer),
                ..Default::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(total, 1);

    let day = chrono::NaiveDate::from_ymd_opt(2024, 3, 2);
    let (rows, total) = app
        .state
        .engine
        .list(
            &MovementFilter {
                date_from: day,
                date_to: day,
                ..Default::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].movement_type, MovementType::In);
}

#[tokio::test]
async fn falling_below_minimum_raises_an_event() {
    let mut app = TestApp::new().await;
    let w = app.warehouse("W").await;
    let p = app
        .product_with(CreateProduct {
            name: "Filter".into(),
            min_stock: Some(dec!(10)),
            ..Default::default()
        })
        .await;
    app.apply(movement(MovementType::In, w, p, dec!(12)))
        .await
        .unwrap();
    app.apply(movement(MovementType::Out, w, p, dec!(5)))
        .await
        .unwrap();

    let events = app.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::StockBelowMinimum { product_id, total_quantity, .. }
            if *product_id == p && *total_quantity == dec!(7)
    )));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::MovementApplied { .. }))
            .count(),
        2
    );

    let low = app.state.reports.low_stock().await.unwrap();
    assert_eq!(low.len(), 1);
    assert_eq!(low[0].shortfall, dec!(3));
}

#[tokio::test]
async fn deleting_a_receipt_can_raise_the_minimum_alert() {
    let mut app = TestApp::new().await;
    let w = app.warehouse("W").await;
    let p = app
        .product_with(CreateProduct {
            name: "Filter".into(),
            min_stock: Some(dec!(10)),
            ..Default::default()
        })
        .await;
    app.apply(movement(MovementType::In, w, p, dec!(8)))
        .await
        .unwrap();
    let top_up = app
        .apply(movement(MovementType::In, w, p, dec!(5)))
        .await
        .unwrap();
    app.drain_events();

    app.state
        .engine
        .delete(top_up.movement.id, None)
        .await
        .unwrap();
    assert_eq!(app.balance(w, p).await, dec!(8));

    let events = app.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::MovementDeleted { product_id, .. } if *product_id == p)));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::StockBelowMinimum { product_id, total_quantity, min_stock }
            if *product_id == p && *total_quantity == dec!(8) && *min_stock == dec!(10)
    )));
}

#[tokio::test]
async fn amounts_beyond_column_range_are_rejected() {
    let app = TestApp::new().await;
    let w = app.warehouse("W").await;
    let p = app.product("P").await;

    assert_matches!(
        app.apply(movement(MovementType::In, w, p, Decimal::MAX)).await,
        Err(ServiceError::ValidationError(msg)) if msg.starts_with("quantity")
    );
    assert_matches!(
        app.apply(MovementRequest {
            unit_cost: Some(Decimal::MAX),
            ..movement(MovementType::In, w, p, dec!(1))
        })
        .await,
        Err(ServiceError::ValidationError(msg)) if msg.starts_with("unit_cost")
    );

    app.apply(movement(MovementType::In, w, p, dec!(5)))
        .await
        .unwrap();
    assert_matches!(
        app.apply(movement(MovementType::In, w, p, MAX_AMOUNT)).await,
        Err(ServiceError::ValidationError(msg)) if msg.contains("resulting balance")
    );
    assert_eq!(app.balance(w, p).await, dec!(5));

    let (_, total) = app
        .state
        .engine
        .list(&MovementFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 1);
}
