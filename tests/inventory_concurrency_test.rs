mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::TestApp;
use plant_checkout::{errors::ServiceError, services::inventory};
use uuid::Uuid;

#[tokio::test]
async fn last_unit_goes_to_exactly_one_checkout() {
    let app = Arc::new(TestApp::new().await);
    let plant = app.seed_plant(1).await;

    let buyers = [Uuid::new_v4(), Uuid::new_v4()];
    let mut handles = Vec::new();
    for (n, owner) in buyers.into_iter().enumerate() {
        app.services.cart.add_item(owner, plant, 1).await.unwrap();
        let payment = app.pay_for_cart(owner, &format!("pay_{}", n)).await;

        let app = app.clone();
        handles.push(tokio::spawn(async move {
            app.services
                .orders
                .commit(owner, &payment, app.shipping_address())
                .await
        }));
    }

    let mut committed = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(ServiceError::InsufficientStock { available: 0, .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!((committed, rejected), (1, 1));
    assert_eq!(app.stock_of(plant).await, 0);
    assert_eq!(app.order_count().await, 1);
    assert_eq!(app.reconciliations().await.len(), 1);
}

#[tokio::test]
async fn concurrent_decrements_never_oversell() {
    let app = Arc::new(TestApp::new().await);
    let plant = app.seed_plant(5).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            inventory::decrement_stock(&*app.db, plant, 2).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => succeeded += 1,
            Err(e) => assert_matches!(e, ServiceError::InsufficientStock { .. }),
        }
    }

    assert_eq!(succeeded, 2);
    assert_eq!(app.stock_of(plant).await, 1);
}

#[tokio::test]
async fn decrement_reports_current_stock() {
    let app = TestApp::new().await;
    let plant = app.seed_plant(3).await;

    assert_matches!(
        inventory::decrement_stock(&*app.db, plant, 4).await,
        Err(ServiceError::InsufficientStock { product_id, available: 3 }) if product_id == plant
    );
    assert_matches!(
        inventory::decrement_stock(&*app.db, Uuid::new_v4(), 1).await,
        Err(ServiceError::NotFound(_))
    );

    inventory::decrement_stock(&*app.db, plant, 3).await.unwrap();
    assert_eq!(app.stock_of(plant).await, 0);
}

#[tokio::test]
async fn stock_check_does_not_mutate() {
    let app = TestApp::new().await;
    let plant = app.seed_plant(4).await;

    let product = inventory::check_and_reserve(&*app.db, plant, 4).await.unwrap();
    assert_eq!(product.id, plant);
    assert_matches!(
        inventory::check_and_reserve(&*app.db, plant, 5).await,
        Err(ServiceError::InsufficientStock { available: 4, .. })
    );
    assert_eq!(app.stock_of(plant).await, 4);
}
