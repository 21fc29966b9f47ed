//! Replay command implementation.
//!
//! Reads a JSON array of updates, publishes them into an in-memory update
//! source and runs one non-persistent changelog search over it.
//!
//! ```json
//! [
//!   {
//!     "domain": "dc=example,dc=com",
//!     "csn": "0000018cc6e4a3a600010000002a",
//!     "dn": "uid=jdoe,ou=People,dc=example,dc=com",
//!     "changetype": "add",
//!     "attributes": { "objectClass": ["top", "person"], "uid": ["jdoe"] }
//!   }
//! ]
//! ```

use ecl_engine::{
    ClientContext, CollectingSink, EclEngine, EngineConfig, MemoryUpdateSource, ReturnedEntry,
    SearchRequest, SearchScope,
};
use ecl_protocol::ldif::encode_entry;
use ecl_protocol::{
    Attribute, ChangeNumber, Modification, ModificationType, RequestControl, UpdateMsg,
    UpdateOperation,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Search parameters for a replay.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Search base.
    pub base: String,
    /// Search scope.
    pub scope: SearchScope,
    /// Search filter.
    pub filter: String,
    /// Starting cookie.
    pub cookie: String,
    /// Extra excluded domains.
    pub exclude: Vec<String>,
    /// Maximum number of entries to return.
    pub size_limit: Option<usize>,
}

/// One update of a replay file.
#[derive(Debug, Deserialize)]
pub struct FixtureUpdate {
    /// Replication domain.
    pub domain: String,
    /// Change number in its 28-digit hex form.
    pub csn: String,
    /// Target entry DN.
    pub dn: String,
    /// Target entry UUID; a random one is used when absent.
    #[serde(default)]
    pub entry_uuid: Option<Uuid>,
    /// The change.
    #[serde(flatten)]
    pub change: FixtureChange,
}

/// The change carried by a [`FixtureUpdate`].
#[derive(Debug, Deserialize)]
#[serde(tag = "changetype", rename_all = "lowercase")]
pub enum FixtureChange {
    /// Entry creation.
    Add {
        /// Attributes of the new entry.
        attributes: BTreeMap<String, Vec<String>>,
    },
    /// Attribute changes.
    Modify {
        /// Modifications in order.
        modifications: Vec<FixtureModification>,
    },
    /// Rename or move.
    Modrdn {
        /// New RDN.
        newrdn: String,
        /// New parent.
        #[serde(default)]
        newsuperior: Option<String>,
        /// Whether the old RDN value was removed.
        #[serde(default)]
        deleteoldrdn: bool,
    },
    /// Entry removal.
    Delete {
        /// Attributes captured at deletion time.
        #[serde(default)]
        attributes: BTreeMap<String, Vec<String>>,
    },
}

/// One modification of a modify change.
#[derive(Debug, Deserialize)]
pub struct FixtureModification {
    /// `add`, `delete`, `replace` or `increment`.
    pub op: String,
    /// Attribute type.
    pub attribute: String,
    /// Values.
    #[serde(default)]
    pub values: Vec<String>,
}

/// JSON rendering of a returned entry.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Entry DN.
    pub dn: String,
    /// Object classes.
    pub object_classes: Vec<String>,
    /// User and operational attributes.
    pub attributes: BTreeMap<String, Vec<String>>,
    /// Cookie of the attached notification control.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
}

/// Runs the replay command.
pub fn run(
    file: &Path,
    options: &ReplayOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Replaying updates from {:?}", file);

    let text = std::fs::read_to_string(file)?;
    let fixtures: Vec<FixtureUpdate> = serde_json::from_str(&text)?;

    let source = MemoryUpdateSource::new();
    for fixture in fixtures {
        let domain = fixture.domain.clone();
        source.publish(&domain, to_update_msg(fixture)?)?;
    }
    info!("Loaded {} updates", source.len());

    let mut config = EngineConfig::default();
    for domain in &options.exclude {
        config = config.with_excluded_domain(domain.as_str());
    }
    let engine = Arc::new(EclEngine::new(config).with_source(Arc::new(source)));

    let request = SearchRequest::new(
        options.base.as_str(),
        options.scope,
        options.filter.as_str(),
        ClientContext::new(0, 1, 1),
    )
    .with_control(RequestControl::cookie(options.cookie.as_str()));

    let mut sink = match options.size_limit {
        Some(limit) => CollectingSink::new().with_size_limit(limit),
        None => CollectingSink::new(),
    };
    let mut operation = engine.search(request);
    let outcome = operation.process(&mut sink);

    match format {
        "json" => {
            let entries: Vec<EntryInfo> = sink.entries().iter().map(entry_info).collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            for returned in sink.entries() {
                print!("{}", encode_entry(&returned.entry));
            }
        }
    }

    info!(
        "Returned {} entries ({} filtered, {} skipped)",
        outcome.stats.entries_returned, outcome.stats.entries_filtered, outcome.stats.synthesis_failures
    );
    if let Some(cookie) = &outcome.cookie {
        info!("Final cookie: {}", cookie);
    }

    if !outcome.is_success() {
        warn!("Search ended with {}", outcome.result_code);
        return Err(format!(
            "search failed: {} ({})",
            outcome.result_code,
            outcome.message.unwrap_or_default()
        )
        .into());
    }

    Ok(())
}

fn to_update_msg(fixture: FixtureUpdate) -> Result<UpdateMsg, Box<dyn std::error::Error>> {
    let csn: ChangeNumber = fixture.csn.parse()?;
    let operation = match fixture.change {
        FixtureChange::Add { attributes } => UpdateOperation::add(&to_attributes(attributes))?,
        FixtureChange::Modify { modifications } => {
            let modifications = modifications
                .into_iter()
                .map(to_modification)
                .collect::<Result<Vec<_>, _>>()?;
            UpdateOperation::modify(&modifications)?
        }
        FixtureChange::Modrdn {
            newrdn,
            newsuperior,
            deleteoldrdn,
        } => UpdateOperation::modify_dn(newrdn, newsuperior, deleteoldrdn),
        FixtureChange::Delete { attributes } => {
            UpdateOperation::delete(&to_attributes(attributes))?
        }
    };
    let entry_uuid = fixture.entry_uuid.unwrap_or_else(Uuid::new_v4);
    Ok(UpdateMsg::new(csn, fixture.dn, entry_uuid, operation))
}

fn to_attributes(attributes: BTreeMap<String, Vec<String>>) -> Vec<Attribute> {
    attributes
        .into_iter()
        .map(|(name, values)| Attribute::new(&name, values))
        .collect()
}

fn to_modification(
    modification: FixtureModification,
) -> Result<Modification, Box<dyn std::error::Error>> {
    let mod_type = match modification.op.to_ascii_lowercase().as_str() {
        "add" => ModificationType::Add,
        "delete" => ModificationType::Delete,
        "replace" => ModificationType::Replace,
        "increment" => ModificationType::Increment,
        other => return Err(format!("unknown modification type {other:?}").into()),
    };
    Ok(Modification::new(
        mod_type,
        Attribute::new(&modification.attribute, modification.values),
    ))
}

fn entry_info(returned: &ReturnedEntry) -> EntryInfo {
    let entry = &returned.entry;
    let mut attributes = BTreeMap::new();
    for attribute in entry
        .user_attributes()
        .iter()
        .chain(entry.operational_attributes())
    {
        attributes.insert(
            attribute.name().to_string(),
            attribute
                .values()
                .iter()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .collect(),
        );
    }
    EntryInfo {
        dn: entry.dn().to_string(),
        object_classes: entry.object_classes().to_vec(),
        attributes,
        cookie: returned.cookie().map(str::to_string),
    }
}
