mod common;

use assert_matches::assert_matches;
use common::{movement, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use stock_ledger::{
    entities::{
        purchase_order::PurchaseOrderStatus,
        purchase_order_item::{self, Entity as PurchaseOrderItem},
        stock_movement::{MovementType, ReferenceKind},
    },
    errors::ServiceError,
    events::Event,
    services::{
        ledger_engine::MovementFilter,
        purchase_orders::{CreatePurchaseOrder, CreatePurchaseOrderItem},
    },
};
use uuid::Uuid;

fn line(product_id: Uuid, quantity: Decimal, unit_price: Decimal) -> CreatePurchaseOrderItem {
    CreatePurchaseOrderItem {
        product_id,
        quantity,
        unit_price,
        notes: None,
    }
}

fn order(number: &str, warehouse_id: Uuid, items: Vec<CreatePurchaseOrderItem>) -> CreatePurchaseOrder {
    CreatePurchaseOrder {
        order_number: number.to_string(),
        supplier_id: None,
        warehouse_id,
        order_date: None,
        expected_date: None,
        tax_amount: Some(dec!(6)),
        notes: None,
        items,
    }
}

#[tokio::test]
async fn receiving_posts_one_in_movement_per_line() {
    let mut app = TestApp::new().await;
    let w = app.warehouse("MAIN").await;
    let x = app.product("X").await;
    let y = app.product("Y").await;

    let created = app
        .state
        .purchase_orders
        .create(
            order("PO-1", w, vec![line(x, dec!(10), dec!(5)), line(y, dec!(3), dec!(20))]),
            None,
        )
        .await
        .unwrap();
    assert_eq!(created.order.status, PurchaseOrderStatus::Draft);
    assert_eq!(created.order.subtotal, dec!(110));
    assert_eq!(created.order.total, dec!(116));
    assert_eq!(created.items.len(), 2);
    assert!(created.warnings.is_empty());

    let sent = app
        .state
        .purchase_orders
        .send(created.order.id, None)
        .await
        .unwrap();
    assert_eq!(sent.order.status, PurchaseOrderStatus::Sent);
    assert!(sent.warnings.is_empty());

    let received = app
        .state
        .purchase_orders
        .receive(created.order.id, None)
        .await
        .unwrap();
    assert_eq!(received.order.status, PurchaseOrderStatus::Received);
    assert!(received.order.received_date.is_some());
    assert!(received.warnings.is_empty());
    assert_eq!(received.movements.len(), 2);
    for m in &received.movements {
        assert_eq!(m.movement_type, MovementType::In);
        assert_eq!(m.warehouse_id, w);
        assert_eq!(m.reference_type, Some(ReferenceKind::PurchaseOrder));
        assert_eq!(m.reference_id, Some(created.order.id));
    }
    let costs: Vec<_> = received.movements.iter().map(|m| m.unit_cost).collect();
    assert!(costs.contains(&Some(dec!(5))));
    assert!(costs.contains(&Some(dec!(20))));
    assert!(received
        .items
        .iter()
        .all(|i| i.received_quantity == i.quantity));

    assert_eq!(app.balance(w, x).await, dec!(10));
    assert_eq!(app.balance(w, y).await, dec!(3));

    let events = app.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::PurchaseOrderReceived { purchase_order_id, movement_ids }
            if *purchase_order_id == created.order.id && movement_ids.len() == 2
    )));
}

#[tokio::test]
async fn draft_orders_can_be_received_directly() {
    let app = TestApp::new().await;
    let w = app.warehouse("MAIN").await;
    let x = app.product("X").await;
    let po = app
        .state
        .purchase_orders
        .create(order("PO-2", w, vec![line(x, dec!(4), dec!(1))]), None)
        .await
        .unwrap();

    app.state
        .purchase_orders
        .receive(po.order.id, None)
        .await
        .unwrap();
    assert_eq!(app.balance(w, x).await, dec!(4));
}

#[tokio::test]
async fn received_orders_cannot_be_received_again() {
    let app = TestApp::new().await;
    let w = app.warehouse("MAIN").await;
    let x = app.product("X").await;
    let po = app
        .state
        .purchase_orders
        .create(order("PO-3", w, vec![line(x, dec!(4), dec!(1))]), None)
        .await
        .unwrap();
    app.state
        .purchase_orders
        .receive(po.order.id, None)
        .await
        .unwrap();

    assert_matches!(
        app.state.purchase_orders.receive(po.order.id, None).await,
        Err(ServiceError::InvalidStatus(msg)) if msg.contains("received")
    );
    assert_matches!(
        app.state.purchase_orders.cancel(po.order.id, None).await,
        Err(ServiceError::InvalidStatus(_))
    );
    assert_eq!(app.balance(w, x).await, dec!(4));

    let (_, total) = app
        .state
        .engine
        .list(&MovementFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn cancelled_orders_post_nothing() {
    let app = TestApp::new().await;
    let w = app.warehouse("MAIN").await;
    let x = app.product("X").await;
    let po = app
        .state
        .purchase_orders
        .create(order("PO-4", w, vec![line(x, dec!(4), dec!(1))]), None)
        .await
        .unwrap();

    let cancelled = app
        .state
        .purchase_orders
        .cancel(po.order.id, None)
        .await
        .unwrap();
    assert_eq!(cancelled.order.status, PurchaseOrderStatus::Cancelled);

    assert_matches!(
        app.state.purchase_orders.receive(po.order.id, None).await,
        Err(ServiceError::InvalidStatus(_))
    );
    assert_matches!(
        app.state.purchase_orders.send(po.order.id, None).await,
        Err(ServiceError::InvalidStatus(_))
    );
    assert_eq!(app.balance(w, x).await, dec!(0));
}

#[tokio::test]
async fn sending_twice_is_rejected() {
    let app = TestApp::new().await;
    let w = app.warehouse("MAIN").await;
    let x = app.product("X").await;
    let po = app
        .state
        .purchase_orders
        .create(order("PO-5", w, vec![line(x, dec!(1), dec!(1))]), None)
        .await
        .unwrap();
    app.state.purchase_orders.send(po.order.id, None).await.unwrap();

    assert_matches!(
        app.state.purchase_orders.send(po.order.id, None).await,
        Err(ServiceError::InvalidStatus(msg)) if msg == "Cannot send purchase order in status sent"
    );
}

#[tokio::test]
async fn order_numbers_are_unique() {
    let app = TestApp::new().await;
    let w = app.warehouse("MAIN").await;
    let x = app.product("X").await;
    app.state
        .purchase_orders
        .create(order("PO-6", w, vec![line(x, dec!(1), dec!(1))]), None)
        .await
        .unwrap();

    assert_matches!(
        app.state
            .purchase_orders
            .create(order("PO-6", w, vec![line(x, dec!(2), dec!(1))]), None)
            .await,
        Err(ServiceError::Conflict(_))
    );
    let (orders, total) = app.state.purchase_orders.list(None, 1, 10).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(orders[0].order_number, "PO-6");
}

#[tokio::test]
async fn invalid_orders_are_rejected() {
    let app = TestApp::new().await;
    let w = app.warehouse("MAIN").await;
    let x = app.product("X").await;

    assert_matches!(
        app.state
            .purchase_orders
            .create(order("PO-7", w, vec![]), None)
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        app.state
            .purchase_orders
            .create(order("PO-7", w, vec![line(x, dec!(0), dec!(1))]), None)
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        app.state
            .purchase_orders
            .create(order("PO-7", w, vec![line(Uuid::new_v4(), dec!(1), dec!(1))]), None)
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        app.state.purchase_orders.get(Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn list_filters_on_status() {
    let app = TestApp::new().await;
    let w = app.warehouse("MAIN").await;
    let x = app.product("X").await;
    for number in ["PO-8", "PO-9", "PO-10"] {
        app.state
            .purchase_orders
            .create(order(number, w, vec![line(x, dec!(1), dec!(1))]), None)
            .await
            .unwrap();
    }
    let (orders, _) = app.state.purchase_orders.list(None, 1, 10).await.unwrap();
    app.state
        .purchase_orders
        .send(orders[0].id, None)
        .await
        .unwrap();

    let (sent, total) = app
        .state
        .purchase_orders
        .list(Some(PurchaseOrderStatus::Sent), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(sent[0].id, orders[0].id);

    let (_, drafts) = app
        .state
        .purchase_orders
        .list(Some(PurchaseOrderStatus::Draft), 1, 10)
        .await
        .unwrap();
    assert_eq!(drafts, 2);
}

#[tokio::test]
async fn received_stock_is_reversible_like_any_movement() {
    let app = TestApp::new().await;
    let w = app.warehouse("MAIN").await;
    let x = app.product("X").await;
    app.apply(movement(MovementType::In, w, x, dec!(2)))
        .await
        .unwrap();
    let po = app
        .state
        .purchase_orders
        .create(order("PO-11", w, vec![line(x, dec!(8), dec!(3))]), None)
        .await
        .unwrap();
    let received = app
        .state
        .purchase_orders
        .receive(po.order.id, None)
        .await
        .unwrap();
    assert_eq!(received.balances.len(), 1);
    assert_eq!(received.balances[0].before, dec!(2));
    assert_eq!(received.balances[0].after, dec!(10));

    app.state
        .engine
        .delete(received.movements[0].id, None)
        .await
        .unwrap();
    assert_eq!(app.balance(w, x).await, dec!(2));
    let report = app.state.reports.consistency_check().await.unwrap();
    assert!(report.consistent);
}

#[tokio::test]
async fn oversized_amounts_are_rejected() {
    let app = TestApp::new().await;
    let w = app.warehouse("MAIN").await;
    let x = app.product("X").await;

    assert_matches!(
        app.state
            .purchase_orders
            .create(
                order("PO-12", w, vec![line(x, dec!(10000000000000000000), dec!(1))]),
                None
            )
            .await,
        Err(ServiceError::ValidationError(msg)) if msg.starts_with("items[0].quantity")
    );
    assert_matches!(
        app.state
            .purchase_orders
            .create(
                order("PO-12", w, vec![line(x, dec!(99999999999), dec!(99999))]),
                None
            )
            .await,
        Err(ServiceError::ValidationError(msg)) if msg.starts_with("items[0].total")
    );

    let mut taxed = order("PO-12", w, vec![line(x, dec!(1), dec!(1))]);
    taxed.tax_amount = Some(Decimal::MAX);
    assert_matches!(
        app.state.purchase_orders.create(taxed, None).await,
        Err(ServiceError::ValidationError(msg)) if msg.starts_with("tax_amount")
    );

    let (_, total) = app.state.purchase_orders.list(None, 1, 10).await.unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn failing_line_rolls_back_the_whole_receipt() {
    let app = TestApp::new().await;
    let w = app.warehouse("MAIN").await;
    let x = app.product("X").await;
    let y = app.product("Y").await;
    let po = app
        .state
        .purchase_orders
        .create(
            order("PO-13", w, vec![line(x, dec!(10), dec!(5)), line(y, dec!(3), dec!(20))]),
            None,
        )
        .await
        .unwrap();

    // Lines are received in creation order, ties broken by id
    let mut items = po.items.clone();
    items.sort_by_key(|i| i.id);
    let (first, second) = (&items[0], &items[1]);

    let missing = Uuid::new_v4();
    let db = &*app.state.db;
    db.execute_unprepared("PRAGMA foreign_keys = OFF").await.unwrap();
    PurchaseOrderItem::update_many()
        .col_expr(purchase_order_item::Column::ProductId, Expr::value(missing))
        .filter(purchase_order_item::Column::Id.eq(second.id))
        .exec(db)
        .await
        .unwrap();
    db.execute_unprepared("PRAGMA foreign_keys = ON").await.unwrap();

    assert_matches!(
        app.state.purchase_orders.receive(po.order.id, None).await,
        Err(ServiceError::NotFound(msg)) if msg.contains(&missing.to_string())
    );

    assert_eq!(app.balance(w, first.product_id).await, dec!(0));
    let (movements, total) = app
        .state
        .engine
        .list(&MovementFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 0);
    assert!(movements.is_empty());

    let after = app.state.purchase_orders.get(po.order.id).await.unwrap();
    assert_eq!(after.order.status, PurchaseOrderStatus::Draft);
    assert!(after.order.received_date.is_none());
    assert!(after
        .items
        .iter()
        .all(|i| i.received_quantity == Decimal::ZERO));
}
