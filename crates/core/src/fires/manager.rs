//! Fire collection management and pipeline execution.
//!
//! `FiresManager` owns the authoritative fire set for a run plus run-wide
//! metadata, and drives a configured sequence of modules over it. Failure
//! containment is two-tier: fire-scoped failures either move the offending
//! fire to the failed list (`skip_failed_fires`) or propagate as a module
//! failure; a module failure skips the remaining non-export modules but
//! still lets export modules run, so a final dump is always produced.

use chrono::Utc;
use rustc_hash::FxHashMap;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::{fill_in_wildcards, RunConfig};
use crate::datautils::deepmerge;
use crate::error::{Result, SmokeError};
use crate::fires::record::FireRecord;
use crate::pipeline::{ModuleKind, ModuleRegistry};

pub struct FiresManager {
    /// Public fire ids in first-occurrence order; keeps iteration and
    /// tranche assignment deterministic.
    fire_ids: Vec<String>,
    fires: FxHashMap<String, Vec<FireRecord>>,
    pub failed_fires: Vec<FireRecord>,
    pub filtered_fires: Vec<FireRecord>,
    meta: Map<String, Value>,
    module_names: Vec<String>,
    config: RunConfig,
    run_id_wildcards_processed: bool,
}

impl FiresManager {
    pub fn new(config: RunConfig) -> Self {
        FiresManager {
            fire_ids: Vec::new(),
            fires: FxHashMap::default(),
            failed_fires: Vec::new(),
            filtered_fires: Vec::new(),
            meta: Map::new(),
            module_names: Vec::new(),
            config,
            run_id_wildcards_processed: false,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn modules(&self) -> &[String] {
        &self.module_names
    }

    pub fn set_modules(&mut self, names: Vec<String>) {
        self.module_names = names;
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.meta
    }

    /// The run id, generating one if absent and expanding the
    /// `{timestamp}` wildcard on first access.
    pub fn run_id(&mut self) -> String {
        let existing = self
            .meta
            .get("run_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        match existing {
            None => {
                let run_id = Uuid::new_v4().to_string();
                self.meta.insert("run_id".to_string(), json!(run_id));
                run_id
            }
            Some(run_id) => {
                if self.run_id_wildcards_processed {
                    run_id
                } else {
                    debug!("filling in run_id wildcards");
                    let now = Utc::now().naive_utc();
                    let filled = fill_in_wildcards(&run_id, now, now.date(), None);
                    self.meta.insert("run_id".to_string(), json!(filled));
                    self.run_id_wildcards_processed = true;
                    filled
                }
            }
        }
    }

    ///
    /// Fire set maintenance
    ///

    pub fn add_fire(&mut self, fire: FireRecord) {
        let list = self.fires.entry(fire.id.clone()).or_default();
        if list.is_empty() {
            self.fire_ids.push(fire.id.clone());
        }
        list.push(fire);
    }

    /// Removes a single record by private identity. Siblings sharing the
    /// public id are untouched; the id key is dropped once its list empties.
    pub fn remove_fire(&mut self, id: &str, private_id: Uuid) -> Option<FireRecord> {
        let list = self.fires.get_mut(id)?;
        let pos = list.iter().position(|f| f.private_id() == private_id)?;
        let fire = list.remove(pos);
        if list.is_empty() {
            self.fires.remove(id);
            self.fire_ids.retain(|i| i != id);
        }
        Some(fire)
    }

    /// All active fires, in deterministic id-then-insertion order.
    pub fn fires(&self) -> Vec<&FireRecord> {
        self.fire_ids
            .iter()
            .filter_map(|id| self.fires.get(id))
            .flatten()
            .collect()
    }

    pub fn fire_count(&self) -> usize {
        self.fires.values().map(Vec::len).sum()
    }

    pub fn fire_ids(&self) -> &[String] {
        &self.fire_ids
    }

    pub fn fires_with_id(&self, id: &str) -> &[FireRecord] {
        self.fires.get(id).map_or(&[], Vec::as_slice)
    }

    /// Drains the active fire set, preserving order. Used by the merge
    /// engines, which consume the whole set and return a reduced one.
    pub fn take_fires(&mut self) -> Vec<FireRecord> {
        let ids = std::mem::take(&mut self.fire_ids);
        let mut map = std::mem::take(&mut self.fires);
        ids.into_iter()
            .filter_map(|id| map.remove(&id))
            .flatten()
            .collect()
    }

    pub fn replace_fires(&mut self, fires: Vec<FireRecord>) {
        self.fire_ids.clear();
        self.fires.clear();
        for f in fires {
            self.add_fire(f);
        }
    }

    ///
    /// Fire-scoped failure containment
    ///

    /// Runs `f` against one fire, containing any failure to that fire.
    ///
    /// On error the failure is recorded onto the record; with
    /// `skip_failed_fires` the fire is excised to the failed list and the
    /// error suppressed, otherwise the error propagates (with the record
    /// keeping its annotation).
    pub fn with_fire_failure<F>(&mut self, id: &str, private_id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut FireRecord) -> Result<()>,
    {
        let outcome = {
            let Some(fire) = self
                .fires
                .get_mut(id)
                .and_then(|l| l.iter_mut().find(|f| f.private_id() == private_id))
            else {
                return Err(SmokeError::Validation(format!(
                    "fire {id} ({private_id}) not managed by this collection"
                )));
            };
            match f(fire) {
                Ok(()) => Ok(()),
                Err(e) => {
                    fire.record_failure(&e);
                    Err(e)
                }
            }
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.config.skip_failed_fires {
                    warn!(fire = id, error = %e, "skipping failed fire");
                    if let Some(fire) = self.remove_fire(id, private_id) {
                        self.failed_fires.push(fire);
                    }
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Applies `f` to every active fire under the fire-scoped failure
    /// policy. With skipping disabled the first failure aborts.
    pub fn for_each_fire<F>(&mut self, f: F) -> Result<()>
    where
        F: Fn(&mut FireRecord) -> Result<()>,
    {
        let keys: Vec<(String, Uuid)> = self
            .fires()
            .iter()
            .map(|fire| (fire.id.clone(), fire.private_id()))
            .collect();
        for (id, private_id) in keys {
            self.with_fire_failure(&id, private_id, &f)?;
        }
        Ok(())
    }

    ///
    /// Processing log and summaries
    ///

    fn with_processing_list(&mut self, f: impl FnOnce(&mut Vec<Value>)) {
        let entry = self
            .meta
            .entry("processing".to_string())
            .or_insert_with(|| json!([]));
        if !entry.is_array() {
            *entry = json!([]);
        }
        if let Value::Array(list) = entry {
            f(list);
        }
    }

    fn record_module_start(&mut self, name: &str) {
        self.with_processing_list(|list| list.push(json!({ "module_name": name })));
    }

    /// Appends a processing-log entry for a module, folding into the bare
    /// start placeholder when that was the last entry recorded.
    pub fn processed(&mut self, module: &str, version: &str, extra: Option<Value>) {
        let mut entry = json!({ "module": module, "version": version });
        if let Some(Value::Object(extra_map)) = extra {
            if let Value::Object(m) = &mut entry {
                m.extend(extra_map);
            }
        }
        self.with_processing_list(|list| {
            let last_is_placeholder = list
                .last()
                .and_then(Value::as_object)
                .is_some_and(|o| o.len() == 1 && o.contains_key("module_name"));
            if last_is_placeholder {
                if let (Some(Value::Object(last)), Value::Object(new)) = (list.last_mut(), &entry)
                {
                    last.extend(new.clone());
                }
            } else {
                list.push(entry);
            }
        });
    }

    /// Deep-merges aggregate data into the run summary.
    pub fn summarize(&mut self, data: &Value) {
        let summary = self
            .meta
            .entry("summary".to_string())
            .or_insert_with(|| json!({}));
        deepmerge(summary, data);
    }

    ///
    /// Loading and dumping
    ///

    /// Replaces the fire set and run metadata from an input mapping.
    ///
    /// `modules` and `fire_information` are extracted; everything else
    /// becomes run metadata. A `run_id` containing wildcards is expanded
    /// immediately.
    pub fn load(&mut self, input: Value) -> Result<()> {
        let Value::Object(mut map) = input else {
            return Err(SmokeError::Validation("invalid fire data".to_string()));
        };

        self.module_names = match map.remove("modules") {
            None => Vec::new(),
            Some(v) => serde_json::from_value(v)
                .map_err(|e| SmokeError::Validation(format!("invalid 'modules' list: {e}")))?,
        };

        self.fire_ids.clear();
        self.fires.clear();
        if let Some(fire_information) = map.remove("fire_information") {
            let Value::Array(items) = fire_information else {
                return Err(SmokeError::Validation(
                    "'fire_information' must be an array".to_string(),
                ));
            };
            for item in items {
                self.add_fire(FireRecord::from_json(item)?);
            }
        }

        self.meta = map;
        if self.meta.contains_key("run_id") {
            self.run_id();
        }
        Ok(())
    }

    /// Run metadata plus the active fire list.
    ///
    /// The configured module list is deliberately excluded: the processing
    /// log already records what ran, and including `modules` would break
    /// piping the output into a subsequent run.
    pub fn dump(&self) -> Value {
        let mut out = self.meta.clone();
        out.insert(
            "fire_information".to_string(),
            Value::Array(self.fires().iter().map(|f| f.to_json()).collect()),
        );
        if !self.failed_fires.is_empty() {
            out.insert(
                "failed_fires".to_string(),
                Value::Array(self.failed_fires.iter().map(FireRecord::to_json).collect()),
            );
        }
        if !self.filtered_fires.is_empty() {
            out.insert(
                "filtered_fires".to_string(),
                Value::Array(
                    self.filtered_fires
                        .iter()
                        .map(FireRecord::to_json)
                        .collect(),
                ),
            );
        }
        Value::Object(out)
    }

    ///
    /// Pipeline execution
    ///

    /// Executes the configured modules in order.
    ///
    /// A module failure is recorded into run metadata and skips the
    /// remaining non-export modules; export modules still run. The caller
    /// is signaled with `PipelineFailure` after all modules have had their
    /// chance, so a dump can still be produced.
    pub fn run(&mut self, registry: &ModuleRegistry) -> Result<()> {
        let names = self.module_names.clone();
        // resolve everything up front so an unknown name fails fast
        let modules = names
            .iter()
            .map(|n| registry.resolve(n))
            .collect::<Result<Vec<_>>>()?;

        let mut failed = false;
        for module in modules {
            if failed && module.kind() != ModuleKind::Export {
                continue;
            }
            debug!(module = module.name(), "running module");
            self.record_module_start(module.name());
            if let Err(e) = module.run(self) {
                failed = true;
                error!(module = module.name(), error = %e, "module failed");
                self.meta.insert(
                    "error".to_string(),
                    json!({
                        "module": module.name(),
                        "message": e.to_string(),
                        "traceback": format!("{e:?}"),
                    }),
                );
            }
        }

        if failed {
            Err(SmokeError::PipelineFailure)
        } else {
            Ok(())
        }
    }
}
