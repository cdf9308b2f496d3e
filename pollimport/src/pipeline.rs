//! Orchestration de l'import d'une juridiction
//!
//! Machine à états séquentielle:
//! `Init → Teardown → Locate → Translate → Persist → PostImport → Reconcile → Report → Done`,
//! `Failed` étant atteignable depuis chaque étape.
//!
//! Le `Teardown` n'est jamais annulé: un import en échec laisse la juridiction
//! vide plutôt que périmée, et une relance repart toujours du `Teardown`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use pollsource::{normalize_area, RawRecord, SourceError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::accumulate::{Accumulator, AddressList, DistrictList, StationList};
use crate::config::{JurisdictionConfig, SourceConfig};
use crate::error::PipelineError;
use crate::fingerprint::record_fingerprint;
use crate::geocode::Geocoder;
use crate::locate::{locate, DataRoots};
use crate::model::{
    normalize_postcode, CanonicalAddress, CanonicalDistrict, CanonicalStation, Entity, Location,
    DEFAULT_DISTRICT_ID,
};
use crate::reconcile::{remove_duplicate_addresses, AddressBase};
use crate::report::{EntityStats, QualityReporter, RunReport};
use crate::slug::slug_for;
use crate::store::Store;
use crate::translate::{Translation, Translator, Translators};

/// Étape de l'import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Init,
    Teardown,
    Locate,
    Translate,
    Persist,
    PostImport,
    Reconcile,
    Report,
    Done,
    Failed,
}

/// Nettoyage propre à une juridiction, exécuté après le chargement
#[async_trait]
pub trait PostImportHook: Send + Sync {
    async fn run(&self, jurisdiction_id: &str, store: &dyn Store) -> Result<()>;
}

/// Import en échec: étape, cause et rapport partiel
#[derive(Debug, Error)]
#[error("{} failed at {stage:?}: {error}", .report.jurisdiction_id)]
pub struct RunFailure {
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
    pub report: RunReport,
}

/// Assemble un [`Pipeline`] et vérifie sa cohérence
pub struct PipelineBuilder {
    config: JurisdictionConfig,
    translators: Translators,
    store: Option<Arc<dyn Store>>,
    roots: DataRoots,
    geocoder: Option<Arc<dyn Geocoder>>,
    address_base: Option<Arc<dyn AddressBase>>,
    reporters: Vec<Arc<dyn QualityReporter>>,
    hooks: HashMap<String, Arc<dyn PostImportHook>>,
    client: Option<reqwest::Client>,
}

impl PipelineBuilder {
    pub fn new(config: JurisdictionConfig) -> Self {
        Self {
            config,
            translators: Translators::new(),
            store: None,
            roots: DataRoots::default(),
            geocoder: None,
            address_base: None,
            reporters: Vec::new(),
            hooks: HashMap::new(),
            client: None,
        }
    }

    /// Traducteurs explicites; les entités sans traducteur reçoivent celui de
    /// la correspondance configurée
    pub fn translators(mut self, translators: Translators) -> Self {
        self.translators = translators;
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn roots(mut self, roots: DataRoots) -> Self {
        self.roots = roots;
        self
    }

    pub fn geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn address_base(mut self, address_base: Arc<dyn AddressBase>) -> Self {
        self.address_base = Some(address_base);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn QualityReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn hook(mut self, name: &str, hook: Arc<dyn PostImportHook>) -> Self {
        self.hooks.insert(name.to_string(), hook);
        self
    }

    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Construit le pipeline.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] si aucun store n'est fourni, si une source
    /// configurée n'a pas de traducteur ou si le hook post-import nommé n'est
    /// pas enregistré.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let config = self.config;
        config.validate()?;

        let store = self
            .store
            .ok_or_else(|| PipelineError::config("no store configured"))?;

        let station = config.mapping(Entity::Station)?;
        let district = config.mapping(Entity::District)?;
        let address = config.mapping(Entity::Address)?;
        let translators = self
            .translators
            .or_mapped(station.as_ref(), district.as_ref(), address.as_ref());

        for (entity, _) in config.sources() {
            let present = match entity {
                Entity::Station => translators.station.is_some(),
                Entity::District => translators.district.is_some(),
                Entity::Address => translators.address.is_some(),
            };
            if !present {
                return Err(PipelineError::config(format!(
                    "{}: a {entity} source is configured but no {entity} translator or mapping is available",
                    config.jurisdiction_id
                )));
            }
        }

        let hook = match &config.post_import {
            Some(name) => Some(self.hooks.get(name).cloned().ok_or_else(|| {
                PipelineError::config(format!("Unknown post-import hook: {name}"))
            })?),
            None => None,
        };

        Ok(Pipeline {
            config,
            translators,
            store,
            roots: self.roots,
            geocoder: self.geocoder,
            address_base: self.address_base,
            reporters: self.reporters,
            hook,
            client: self.client.unwrap_or_default(),
        })
    }
}

/// Import d'une juridiction, prêt à être exécuté
pub struct Pipeline {
    config: JurisdictionConfig,
    translators: Translators,
    store: Arc<dyn Store>,
    roots: DataRoots,
    geocoder: Option<Arc<dyn Geocoder>>,
    address_base: Option<Arc<dyn AddressBase>>,
    reporters: Vec<Arc<dyn QualityReporter>>,
    hook: Option<Arc<dyn PostImportHook>>,
    client: reqwest::Client,
}

/// Enregistrements de l'étape `Translate`
#[derive(Default)]
struct Loaded {
    stations: StationList,
    districts: DistrictList,
    addresses: AddressList,
}

impl Pipeline {
    pub fn builder(config: JurisdictionConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn jurisdiction_id(&self) -> &str {
        &self.config.jurisdiction_id
    }

    /// Exécute l'import complet.
    ///
    /// Un nouvel état (accumulateurs, rapport) est créé à chaque appel.
    pub async fn run(&self) -> Result<RunReport, RunFailure> {
        let started = Instant::now();
        let mut report = RunReport::new(self.jurisdiction_id());
        let span = info_span!("import", jurisdiction = %self.config.jurisdiction_id);

        let result = self.execute(&mut report, started).instrument(span).await;

        match result {
            Ok(()) => {
                report.stage = Stage::Done;
                info!(
                    jurisdiction = %self.config.jurisdiction_id,
                    duration_secs = report.duration_secs,
                    status = ?report.status,
                    "Import done"
                );
                Ok(report)
            }
            Err(error) => {
                let stage = report.stage;
                report.record_failure(stage, error.to_string());
                report.set_duration(started.elapsed());
                report.finalize();
                error!(
                    jurisdiction = %self.config.jurisdiction_id,
                    stage = ?stage,
                    error = %error,
                    "Import failed"
                );
                Err(RunFailure {
                    stage,
                    error,
                    report,
                })
            }
        }
    }

    fn enter(&self, report: &mut RunReport, stage: Stage) {
        report.stage = stage;
        info!(stage = ?stage, "Stage");
    }

    async fn execute(&self, report: &mut RunReport, started: Instant) -> Result<(), PipelineError> {
        let id = self.config.jurisdiction_id.as_str();
        let store = self.store.as_ref();

        self.enter(report, Stage::Teardown);
        store
            .delete_jurisdiction(id)
            .await
            .map_err(PipelineError::Store)?;

        self.enter(report, Stage::Locate);
        let dir = locate(&self.config, &self.roots)?;

        self.enter(report, Stage::Translate);
        let mut loaded = Loaded::default();
        self.translate(dir.as_deref(), &mut loaded, report).await?;
        self.geocode_stations(&mut loaded.stations, report).await;

        self.enter(report, Stage::Persist);
        self.persist(&loaded, report).await?;

        if let Some(hook) = &self.hook {
            self.enter(report, Stage::PostImport);
            hook.run(id, store).await.map_err(PipelineError::Hook)?;
        }

        self.enter(report, Stage::Reconcile);
        self.reconcile(report).await?;

        self.enter(report, Stage::Report);
        report.set_duration(started.elapsed());
        report.finalize();
        let mut unpublished = Vec::new();
        for reporter in &self.reporters {
            if let Err(e) = reporter.publish(report).await {
                warn!(error = %e, "Quality report not published");
                unpublished.push(e.to_string());
            }
        }
        if !unpublished.is_empty() {
            for cause in unpublished {
                report.record_warning(format!("quality report not published: {cause}"));
            }
            report.finalize();
        }

        Ok(())
    }

    async fn translate(
        &self,
        dir: Option<&Path>,
        loaded: &mut Loaded,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        for (entity, source) in self.config.sources() {
            let records = self.read_source(source, dir).await?;
            let fields = self.config.fingerprint(entity)?;
            let stats = report.entity(entity);
            stats.read += records.len();

            match entity {
                Entity::District => {
                    if let Some(translator) = &self.translators.district {
                        self.load_districts(
                            source,
                            &fields,
                            records,
                            translator.as_ref(),
                            &mut loaded.districts,
                            stats,
                        )?;
                    }
                }
                Entity::Station => {
                    if let Some(translator) = &self.translators.station {
                        self.load_stations(
                            source,
                            &fields,
                            records,
                            translator.as_ref(),
                            &mut loaded.stations,
                            stats,
                        )?;
                    }
                }
                Entity::Address => {
                    if let Some(translator) = &self.translators.address {
                        self.load_addresses(
                            source,
                            &fields,
                            records,
                            translator.as_ref(),
                            &mut loaded.addresses,
                            stats,
                        )?;
                    }
                }
            }

            info!(
                entity = %entity,
                read = stats.read,
                skipped = stats.skipped,
                duplicates = stats.duplicates,
                "Translated"
            );
        }
        Ok(())
    }

    /// Lit une source locale (tâche bloquante) ou distante
    async fn read_source(
        &self,
        source: &SourceConfig,
        dir: Option<&Path>,
    ) -> Result<Vec<RawRecord>, PipelineError> {
        let format = source.format()?;

        match (dir, &source.name, &source.url) {
            (Some(dir), Some(name), _) => {
                let path: PathBuf = dir.join(name);
                debug!(path = %path.display(), format = format.name(), "Reading source");
                let records = tokio::task::spawn_blocking(move || pollsource::open(&format, &path))
                    .await
                    .map_err(|e| SourceError::Io(std::io::Error::other(e)))??;
                Ok(records)
            }
            (_, _, Some(url)) => Ok(pollsource::remote::open(&self.client, url, &format).await?),
            _ => Err(PipelineError::config(format!(
                "{}: source has no local file name or url",
                self.config.jurisdiction_id
            ))),
        }
    }

    fn load_stations(
        &self,
        source: &SourceConfig,
        fields: &[String],
        records: Vec<RawRecord>,
        translator: &dyn Translator<crate::translate::StationDraft>,
        list: &mut StationList,
        stats: &mut EntityStats,
    ) -> Result<(), PipelineError> {
        for (raw, draft) in drafts(Entity::Station, source, records, translator, stats)? {
            let location = draft.location.or_else(|| {
                raw.first_point().map(|point| Location {
                    point,
                    srid: self.config.srid,
                })
            });
            let station = CanonicalStation {
                jurisdiction_id: self.attach(draft.jurisdiction_id),
                internal_id: draft.internal_id,
                address: draft.address,
                postcode: normalize_postcode(&draft.postcode),
                location,
            };
            accumulate(list, fields, &raw, station, stats);
        }
        Ok(())
    }

    fn load_districts(
        &self,
        source: &SourceConfig,
        fields: &[String],
        records: Vec<RawRecord>,
        translator: &dyn Translator<crate::translate::DistrictDraft>,
        list: &mut DistrictList,
        stats: &mut EntityStats,
    ) -> Result<(), PipelineError> {
        let srid = self.config.districts_srid();
        for (raw, draft) in drafts(Entity::District, source, records, translator, stats)? {
            let internal_id = draft
                .internal_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DISTRICT_ID.to_string());

            let geometry = draft.area.as_ref().or(raw.geometry()).ok_or_else(|| {
                PipelineError::translation(
                    Entity::District,
                    format!("district {internal_id} has no geometry"),
                )
            })?;
            let area = normalize_area(geometry, srid)?;

            let district = CanonicalDistrict {
                jurisdiction_id: self.attach(draft.jurisdiction_id),
                internal_id,
                name: draft.name,
                area,
            };
            accumulate(list, fields, &raw, district, stats);
        }
        Ok(())
    }

    fn load_addresses(
        &self,
        source: &SourceConfig,
        fields: &[String],
        records: Vec<RawRecord>,
        translator: &dyn Translator<crate::translate::AddressDraft>,
        list: &mut AddressList,
        stats: &mut EntityStats,
    ) -> Result<(), PipelineError> {
        for (raw, draft) in drafts(Entity::Address, source, records, translator, stats)? {
            let jurisdiction_id = self.attach(draft.jurisdiction_id);
            let postcode = normalize_postcode(&draft.postcode);
            let slug = slug_for(
                &jurisdiction_id,
                &draft.station_ref,
                &draft.address,
                &postcode,
                draft.uprn.as_deref(),
            );
            let address = CanonicalAddress {
                jurisdiction_id,
                slug,
                address: draft.address,
                postcode,
                station_ref: draft.station_ref,
            };
            accumulate(list, fields, &raw, address, stats);
        }
        Ok(())
    }

    fn attach(&self, jurisdiction_id: Option<String>) -> String {
        jurisdiction_id.unwrap_or_else(|| self.config.jurisdiction_id.clone())
    }

    /// Position des bureaux depuis leur code postal, quand la juridiction l'autorise
    async fn geocode_stations(&self, stations: &mut StationList, report: &mut RunReport) {
        if !self.config.allow_station_point_from_postcode {
            return;
        }

        let missing = stations
            .records()
            .iter()
            .filter(|s| s.location.is_none())
            .count();
        if missing == 0 {
            return;
        }

        let Some(geocoder) = &self.geocoder else {
            warn!(stations = missing, "No geocoder configured, stations left without location");
            report.record_warning(format!("{missing} stations without location (no geocoder)"));
            return;
        };

        let mut located = 0;
        for station in stations.records_mut().iter_mut().filter(|s| s.location.is_none()) {
            station.location = geocoder.geocode(&station.postcode).await;
            if station.location.is_some() {
                located += 1;
            }
        }

        info!(missing = missing, located = located, "Stations geocoded from postcode");
        if located < missing {
            report.record_warning(format!(
                "{} stations without location after geocoding",
                missing - located
            ));
        }
    }

    async fn persist(&self, loaded: &Loaded, report: &mut RunReport) -> Result<(), PipelineError> {
        let store = self.store.as_ref();

        if !loaded.districts.is_empty() {
            let upsert = loaded.districts.save(store).await?;
            report.record_upsert(Entity::District, &upsert);
        }
        if !loaded.stations.is_empty() {
            let upsert = loaded.stations.save(store).await?;
            report.record_upsert(Entity::Station, &upsert);
        }
        if !loaded.addresses.is_empty() {
            let upsert = loaded.addresses.save(store).await?;
            report.record_upsert(Entity::Address, &upsert);

            let known: HashSet<String> = store
                .stations(&self.config.jurisdiction_id)
                .await
                .map_err(PipelineError::Store)?
                .into_iter()
                .map(|s| s.internal_id)
                .collect();
            let unresolved = loaded
                .addresses
                .records()
                .iter()
                .filter(|a| !known.contains(&a.station_ref))
                .count();
            report.unresolved_station_refs = unresolved;
            if unresolved > 0 {
                warn!(addresses = unresolved, "Addresses referencing an unknown station");
            }
        }
        Ok(())
    }

    async fn reconcile(&self, report: &mut RunReport) -> Result<(), PipelineError> {
        let id = self.config.jurisdiction_id.as_str();
        let store = self.store.as_ref();

        report.duplicates_removed = remove_duplicate_addresses(store, id)
            .await
            .map_err(PipelineError::Store)?;

        let Some(address_base) = &self.address_base else {
            return Ok(());
        };
        if report.stats(Entity::District).persisted() == 0 {
            debug!("No districts persisted, overlap resolution skipped");
            return Ok(());
        }

        let outcome = address_base
            .resolve_overlaps(id, store)
            .await
            .map_err(PipelineError::Store)?;
        info!(
            no_attention_needed = outcome.no_attention_needed,
            addresses_created = outcome.addresses_created,
            residual_ambiguous = outcome.residual_ambiguous,
            "Postcode/district overlaps resolved"
        );
        if outcome.residual_ambiguous > 0 {
            warn!(addresses = outcome.residual_ambiguous, "Addresses still ambiguous");
            report.record_warning(format!(
                "{} addresses still ambiguous after overlap resolution",
                outcome.residual_ambiguous
            ));
        }
        report.overlap = Some(outcome);
        Ok(())
    }
}

/// Corrections, règles d'exclusion puis traduction de chaque enregistrement
fn drafts<T>(
    entity: Entity,
    source: &SourceConfig,
    records: Vec<RawRecord>,
    translator: &dyn Translator<T>,
    stats: &mut EntityStats,
) -> Result<Vec<(RawRecord, T)>, PipelineError> {
    let mut out = Vec::with_capacity(records.len());
    for raw in records {
        let raw = match &source.overrides {
            Some(table) => match table.apply(&raw) {
                Translation::Record(patched) => patched,
                Translation::Skip => {
                    debug!(entity = %entity, "Record skipped by override table");
                    stats.skipped += 1;
                    continue;
                }
            },
            None => raw,
        };

        match translator.translate(&raw)? {
            Translation::Record(draft) => out.push((raw, draft)),
            Translation::Skip => {
                debug!(entity = %entity, "Record skipped by translator");
                stats.skipped += 1;
            }
        }
    }
    Ok(out)
}

/// Ajoute au lot; premier vu gagne quand des champs d'empreinte sont définis
fn accumulate<T>(
    list: &mut Accumulator<T>,
    fields: &[String],
    raw: &RawRecord,
    record: T,
    stats: &mut EntityStats,
) {
    if fields.is_empty() {
        list.add(record);
    } else if !list.add_if_new(record_fingerprint(raw, fields), record) {
        stats.duplicates += 1;
    }
}
