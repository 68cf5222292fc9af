//! Background pass that finishes image moves interrupted between a product
//! write and its staged-image relocation.

use std::time::Duration;

use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    Collection,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::Result,
    handlers::products::settle_staged_images,
    images::{is_staged_url, PUBLIC_URL_PREFIX, STAGING_MARKER},
    models::product::{self, Product},
    state::AppState,
};

/// Products whose image list still has at least one staged URL.
pub fn staged_images_filter() -> Document {
    let pattern = format!("^{}{}", regex::escape(PUBLIC_URL_PREFIX), regex::escape(STAGING_MARKER));
    doc! { "images": { "$regex": pattern } }
}

/// Returns how many products were left without staged URLs.
pub async fn reconcile_staged_images(state: &AppState) -> Result<usize> {
    let collection: Collection<Product> = state.database.collection(product::COLLECTION);
    let stale: Vec<Product> = collection
        .find(staged_images_filter(), None)
        .await?
        .try_collect()
        .await?;

    if stale.is_empty() {
        debug!("No staged images left to reconcile");
        return Ok(0);
    }

    let mut settled = 0;
    for product in stale {
        let Some(product_id) = product.id else {
            continue;
        };
        match settle_staged_images(state, &collection, product_id, product.images).await {
            Ok(images) if !images.iter().any(|url| is_staged_url(url)) => settled += 1,
            Ok(_) => {}
            Err(e) => warn!(%product_id, "Could not settle staged images: {}", e),
        }
    }

    info!(settled, "Reconciled staged product images");
    Ok(settled)
}

async fn run_pass(state: &AppState) {
    if let Err(e) = reconcile_staged_images(state).await {
        error!("Image reconciliation failed: {}", e);
    }
}

/// Runs one pass right away and then, if `every` is set, periodically.
pub fn spawn_reconciler(state: AppState, every: Option<Duration>) {
    actix_web::rt::spawn(async move {
        run_pass(&state).await;

        let Some(period) = every else {
            return;
        };
        let mut ticker = tokio::time::interval(period);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_pass(&state).await;
        }
    });
}
