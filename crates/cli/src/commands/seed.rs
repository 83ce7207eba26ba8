//! Seed the database with a demo shop, user and captains.
//!
//! Captains are placed north of the shop at growing distances and marked
//! available, so a freshly seeded database can dispatch a ride straight away.

use chrono::Utc;
use tiffin_core::{CaptainAvailability, GeoPoint};
use tiffin_dispatch::db::{self, PgStore};
use tiffin_dispatch::models::{NewCaptain, NewShop, NewUser};
use tiffin_dispatch::store::DispatchStore;
use tracing::info;

use super::database_url;

/// Latitude step between seeded captains (about 0.8 km).
const CAPTAIN_SPACING_DEG: f64 = 0.0075;

/// Seed one shop at (`lat`, `lng`), one user and `captains` captains.
///
/// # Errors
///
/// Returns an error if the coordinates are out of range or the database
/// rejects an insert.
pub async fn run(lat: f64, lng: f64, captains: u32) -> Result<(), Box<dyn std::error::Error>> {
    let location = GeoPoint::new(lat, lng)?;
    let pool = db::create_pool(&database_url()?).await?;
    let store = PgStore::new(pool);
    let now = Utc::now();

    let shop = store
        .insert_shop(
            &NewShop {
                name: "Demo Tiffin House".to_owned(),
                location,
            },
            now,
        )
        .await?;
    info!(shop_id = %shop.id, "Seeded shop");

    let user = store
        .insert_user(
            &NewUser {
                name: "Demo User".to_owned(),
                phone: "+91 90000 00000".to_owned(),
            },
            now,
        )
        .await?;
    info!(user_id = %user.id, "Seeded user");

    for n in 1..=captains {
        let captain = store
            .insert_captain(
                &NewCaptain {
                    name: format!("Captain {n}"),
                    vehicle: format!("scooter KA-01-{:04}", 1000 + n),
                },
                now,
            )
            .await?;
        let position = GeoPoint::new(lat + CAPTAIN_SPACING_DEG * f64::from(n), lng)?;
        store
            .update_captain_location(captain.id, position, now)
            .await?;
        store
            .set_captain_availability(captain.id, CaptainAvailability::Available)
            .await?;
        info!(captain_id = %captain.id, lat = position.lat(), "Seeded captain");
    }

    info!("Seeding complete!");
    Ok(())
}
