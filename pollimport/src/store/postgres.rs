//! Store PostGIS
//!
//! Une table par type d'entité, contrainte d'unicité sur la clé naturelle.
//! Les géométries sont envoyées en EWKB avec le SRID de la source et stockées
//! en EPSG:4326 via `ST_Transform`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use geo::{Geometry, MultiPolygon};
use pollsource::{Area, WGS84_SRID};
use tracing::{info, warn};
use wkb::{geom_to_wkb, wkb_to_geom};

use super::pool::{create_pool, DatabaseConfig};
use super::{Store, UpsertResult};
use crate::model::{CanonicalAddress, CanonicalDistrict, CanonicalStation, Location};
use crate::report::{QualityReporter, RunReport};

/// Store PostgreSQL/PostGIS
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
    schema: String,
}

impl PgStore {
    pub fn new(pool: Pool, schema: &str) -> Result<Self> {
        check_identifier(schema)?;
        Ok(Self {
            pool,
            schema: schema.to_string(),
        })
    }

    /// Ouvre un pool et vérifie la connexion
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = create_pool(config).await?;
        Self::new(pool, &config.schema)
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Crée le schéma, l'extension PostGIS et les tables si nécessaire
    pub async fn create_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;
        let s = &self.schema;

        client
            .execute(&format!("CREATE SCHEMA IF NOT EXISTS {s}"), &[])
            .await
            .context("Failed to create schema")?;

        // L'utilisateur peut ne pas avoir le droit de créer l'extension
        // alors qu'elle est déjà installée
        if let Err(e) = client
            .execute("CREATE EXTENSION IF NOT EXISTS postgis", &[])
            .await
        {
            warn!("CREATE EXTENSION postgis failed (will check if already installed): {e}");
            let exists = client
                .query_opt("SELECT 1 FROM pg_extension WHERE extname = 'postgis'", &[])
                .await
                .context("Failed to check pg_extension")?
                .is_some();
            if !exists {
                return Err(anyhow!(
                    "PostGIS extension is not installed and could not be created: {e}"
                ));
            }
        }

        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {s}.polling_stations (
                jurisdiction_id TEXT NOT NULL,
                internal_id TEXT NOT NULL,
                address TEXT NOT NULL,
                postcode TEXT NOT NULL,
                location geometry(Point, 4326),
                PRIMARY KEY (jurisdiction_id, internal_id)
            );

            CREATE TABLE IF NOT EXISTS {s}.polling_districts (
                jurisdiction_id TEXT NOT NULL,
                internal_id TEXT NOT NULL,
                name TEXT NOT NULL,
                area geometry(MultiPolygon, 4326) NOT NULL,
                PRIMARY KEY (jurisdiction_id, internal_id)
            );

            CREATE TABLE IF NOT EXISTS {s}.addresses (
                slug TEXT PRIMARY KEY,
                jurisdiction_id TEXT NOT NULL,
                address TEXT NOT NULL,
                postcode TEXT NOT NULL,
                station_ref TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {s}.data_quality (
                jurisdiction_id TEXT PRIMARY KEY,
                num_stations BIGINT NOT NULL,
                num_districts BIGINT NOT NULL,
                num_addresses BIGINT NOT NULL,
                report TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE INDEX IF NOT EXISTS idx_addresses_jurisdiction ON {s}.addresses (jurisdiction_id);
            CREATE INDEX IF NOT EXISTS idx_addresses_postcode ON {s}.addresses (postcode);
            CREATE INDEX IF NOT EXISTS idx_polling_districts_area ON {s}.polling_districts USING GIST (area);
            "#
        );

        client
            .batch_execute(&sql)
            .await
            .context("Failed to create import tables")?;

        info!(schema = %s, "Schema ready");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn delete_jurisdiction(&self, jurisdiction_id: &str) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let s = &self.schema;

        let mut deleted = 0;
        for table in ["addresses", "polling_stations", "polling_districts"] {
            deleted += tx
                .execute(
                    &format!("DELETE FROM {s}.{table} WHERE jurisdiction_id = $1"),
                    &[&jurisdiction_id],
                )
                .await
                .with_context(|| format!("Failed to delete from {s}.{table}"))?;
        }

        tx.commit().await.context("Failed to commit teardown")?;
        info!(jurisdiction = jurisdiction_id, rows = deleted, "Previous import removed");
        Ok(())
    }

    async fn upsert_station(&self, station: &CanonicalStation) -> Result<UpsertResult> {
        let client = self.pool.get().await?;
        let location = station
            .location
            .map(|l| geometry_to_ewkb(&Geometry::Point(l.point), l.srid))
            .transpose()?;

        let row = client
            .query_one(
                &format!(
                    r#"
                    INSERT INTO {}.polling_stations (jurisdiction_id, internal_id, address, postcode, location)
                    VALUES ($1, $2, $3, $4, ST_Transform(ST_GeomFromEWKB($5), 4326))
                    ON CONFLICT (jurisdiction_id, internal_id) DO UPDATE SET
                        address = EXCLUDED.address,
                        postcode = EXCLUDED.postcode,
                        location = EXCLUDED.location
                    RETURNING (xmax = 0) AS inserted
                    "#,
                    self.schema
                ),
                &[
                    &station.jurisdiction_id,
                    &station.internal_id,
                    &station.address,
                    &station.postcode,
                    &location,
                ],
            )
            .await
            .with_context(|| format!("Failed to upsert station {}", station.internal_id))?;

        Ok(upsert_result(row.get("inserted")))
    }

    async fn upsert_district(&self, district: &CanonicalDistrict) -> Result<UpsertResult> {
        let client = self.pool.get().await?;
        let area = geometry_to_ewkb(
            &Geometry::MultiPolygon(district.area.geometry.clone()),
            district.area.srid,
        )?;

        let row = client
            .query_one(
                &format!(
                    r#"
                    INSERT INTO {}.polling_districts (jurisdiction_id, internal_id, name, area)
                    VALUES ($1, $2, $3, ST_Multi(ST_Transform(ST_GeomFromEWKB($4), 4326)))
                    ON CONFLICT (jurisdiction_id, internal_id) DO UPDATE SET
                        name = EXCLUDED.name,
                        area = EXCLUDED.area
                    RETURNING (xmax = 0) AS inserted
                    "#,
                    self.schema
                ),
                &[
                    &district.jurisdiction_id,
                    &district.internal_id,
                    &district.name,
                    &area,
                ],
            )
            .await
            .with_context(|| format!("Failed to upsert district {}", district.internal_id))?;

        Ok(upsert_result(row.get("inserted")))
    }

    async fn upsert_address(&self, address: &CanonicalAddress) -> Result<UpsertResult> {
        let client = self.pool.get().await?;

        let row = client
            .query_one(
                &format!(
                    r#"
                    INSERT INTO {}.addresses (slug, jurisdiction_id, address, postcode, station_ref)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (slug) DO UPDATE SET
                        jurisdiction_id = EXCLUDED.jurisdiction_id,
                        address = EXCLUDED.address,
                        postcode = EXCLUDED.postcode,
                        station_ref = EXCLUDED.station_ref
                    RETURNING (xmax = 0) AS inserted
                    "#,
                    self.schema
                ),
                &[
                    &address.slug,
                    &address.jurisdiction_id,
                    &address.address,
                    &address.postcode,
                    &address.station_ref,
                ],
            )
            .await
            .with_context(|| format!("Failed to upsert address {}", address.slug))?;

        Ok(upsert_result(row.get("inserted")))
    }

    async fn stations(&self, jurisdiction_id: &str) -> Result<Vec<CanonicalStation>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT internal_id, address, postcode, ST_AsBinary(location) AS location
                     FROM {}.polling_stations WHERE jurisdiction_id = $1 ORDER BY internal_id",
                    self.schema
                ),
                &[&jurisdiction_id],
            )
            .await
            .context("Failed to read stations")?;

        rows.iter()
            .map(|row| {
                let location: Option<Vec<u8>> = row.get("location");
                let location = match location {
                    Some(bytes) => match wkb_to_geometry(&bytes)? {
                        Geometry::Point(point) => Some(Location {
                            point,
                            srid: WGS84_SRID,
                        }),
                        other => return Err(anyhow!("unexpected station geometry {other:?}")),
                    },
                    None => None,
                };

                Ok(CanonicalStation {
                    jurisdiction_id: jurisdiction_id.to_string(),
                    internal_id: row.get("internal_id"),
                    address: row.get("address"),
                    postcode: row.get("postcode"),
                    location,
                })
            })
            .collect()
    }

    async fn districts(&self, jurisdiction_id: &str) -> Result<Vec<CanonicalDistrict>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT internal_id, name, ST_AsBinary(area) AS area
                     FROM {}.polling_districts WHERE jurisdiction_id = $1 ORDER BY internal_id",
                    self.schema
                ),
                &[&jurisdiction_id],
            )
            .await
            .context("Failed to read districts")?;

        rows.iter()
            .map(|row| {
                let bytes: Vec<u8> = row.get("area");
                let geometry = match wkb_to_geometry(&bytes)? {
                    Geometry::MultiPolygon(multi) => multi,
                    Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
                    other => return Err(anyhow!("unexpected district geometry {other:?}")),
                };

                Ok(CanonicalDistrict {
                    jurisdiction_id: jurisdiction_id.to_string(),
                    internal_id: row.get("internal_id"),
                    name: row.get("name"),
                    area: Area {
                        geometry,
                        srid: WGS84_SRID,
                    },
                })
            })
            .collect()
    }

    async fn addresses(&self, jurisdiction_id: &str) -> Result<Vec<CanonicalAddress>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT slug, address, postcode, station_ref
                     FROM {}.addresses WHERE jurisdiction_id = $1 ORDER BY slug",
                    self.schema
                ),
                &[&jurisdiction_id],
            )
            .await
            .context("Failed to read addresses")?;

        Ok(rows
            .iter()
            .map(|row| CanonicalAddress {
                jurisdiction_id: jurisdiction_id.to_string(),
                slug: row.get("slug"),
                address: row.get("address"),
                postcode: row.get("postcode"),
                station_ref: row.get("station_ref"),
            })
            .collect())
    }

    async fn delete_addresses(&self, jurisdiction_id: &str, slugs: &[String]) -> Result<usize> {
        if slugs.is_empty() {
            return Ok(0);
        }
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                &format!(
                    "DELETE FROM {}.addresses WHERE jurisdiction_id = $1 AND slug = ANY($2)",
                    self.schema
                ),
                &[&jurisdiction_id, &slugs],
            )
            .await
            .context("Failed to delete addresses")?;

        Ok(deleted as usize)
    }
}

/// Rapport qualité persisté dans `data_quality`, un par juridiction
pub struct PgQualityReporter {
    store: PgStore,
}

impl PgQualityReporter {
    pub fn new(store: PgStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl QualityReporter for PgQualityReporter {
    async fn publish(&self, report: &RunReport) -> Result<()> {
        let client = self.store.pool.get().await?;
        let (stations, districts, addresses) = report.counts();
        let text = serde_json::to_string(report)?;

        client
            .execute(
                &format!(
                    r#"
                    INSERT INTO {}.data_quality
                        (jurisdiction_id, num_stations, num_districts, num_addresses, report, updated_at)
                    VALUES ($1, $2, $3, $4, $5, NOW())
                    ON CONFLICT (jurisdiction_id) DO UPDATE SET
                        num_stations = EXCLUDED.num_stations,
                        num_districts = EXCLUDED.num_districts,
                        num_addresses = EXCLUDED.num_addresses,
                        report = EXCLUDED.report,
                        updated_at = NOW()
                    "#,
                    self.store.schema
                ),
                &[
                    &report.jurisdiction_id,
                    &(stations as i64),
                    &(districts as i64),
                    &(addresses as i64),
                    &text,
                ],
            )
            .await
            .context("Failed to write data quality report")?;

        Ok(())
    }
}

fn upsert_result(inserted: bool) -> UpsertResult {
    if inserted {
        UpsertResult::Inserted
    } else {
        UpsertResult::Updated
    }
}

/// Les noms de schéma sont interpolés dans le SQL
fn check_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(anyhow!("Invalid schema name {name:?}: use lowercase letters, digits and _"))
    }
}

/// Convertit une géométrie en EWKB PostGIS (WKB + drapeau et valeur de SRID)
fn geometry_to_ewkb(geom: &Geometry<f64>, srid: u32) -> Result<Vec<u8>> {
    let wkb = geom_to_wkb(geom).map_err(|e| anyhow!("Failed to convert geometry to WKB: {e:?}"))?;
    if wkb.len() < 5 {
        return Err(anyhow!("WKB too short ({} bytes)", wkb.len()));
    }

    let little_endian = wkb[0] == 1;
    let type_bytes = [wkb[1], wkb[2], wkb[3], wkb[4]];

    let mut ewkb = Vec::with_capacity(wkb.len() + 4);
    ewkb.push(wkb[0]);
    if little_endian {
        let geom_type = u32::from_le_bytes(type_bytes) | 0x2000_0000;
        ewkb.extend_from_slice(&geom_type.to_le_bytes());
        ewkb.extend_from_slice(&srid.to_le_bytes());
    } else {
        let geom_type = u32::from_be_bytes(type_bytes) | 0x2000_0000;
        ewkb.extend_from_slice(&geom_type.to_be_bytes());
        ewkb.extend_from_slice(&srid.to_be_bytes());
    }
    ewkb.extend_from_slice(&wkb[5..]);

    Ok(ewkb)
}

fn wkb_to_geometry(bytes: &[u8]) -> Result<Geometry<f64>> {
    let mut reader = bytes;
    wkb_to_geom(&mut reader).map_err(|e| anyhow!("Failed to decode WKB: {e:?}"))
}
