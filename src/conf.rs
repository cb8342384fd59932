//! Definition of the calls database configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// File names expected in a calls database directory next to `conf.toml`.
pub const DB_FILE_NAMES: &[&str] = &["genes.tsv", "conditions.tsv", "ontology.tsv", "calls.tsv"];

/// Configuration for the database backing the expression calls.
#[derive(Serialize, Deserialize, PartialEq, Debug)]
pub struct DbConf {
    /// Free-text label of the database build.
    pub label: Option<String>,
    /// Per-species configuration.
    pub species: Vec<SpeciesConf>,
}

/// Configuration of one species in the database.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct SpeciesConf {
    /// Internal numeric species identifier.
    pub id: u32,
    /// Scientific name, e.g., "Mus musculus".
    pub name: String,
    /// Maximal gene rank in this species, denominator of the expression
    /// score computation.
    pub max_rank: f64,
}

impl DbConf {
    /// Return the configuration for the species with the given identifier.
    pub fn species(&self, species_id: u32) -> Option<&SpeciesConf> {
        self.species.iter().find(|s| s.id == species_id)
    }
}

/// Load the configuration from `path_db/conf.toml`.
pub fn load_db_conf<P: AsRef<Path>>(path_db: P) -> Result<DbConf, anyhow::Error> {
    let path_conf = path_db.as_ref().join("conf.toml");
    let toml_str = std::fs::read_to_string(&path_conf)
        .map_err(|e| anyhow::anyhow!("could not read {:?}: {}", &path_conf, e))?;
    let conf: DbConf = toml::from_str(&toml_str)
        .map_err(|e| anyhow::anyhow!("could not parse {:?}: {}", &path_conf, e))?;
    Ok(conf)
}

/// Perform sanity checks on the database at `path_db`.
///
/// Returns the error messages found, or `None` if the database looks usable.
/// Each expected file may also be present with an additional `.gz` suffix.
pub fn sanity_check_db<P: AsRef<Path>>(path_db: P) -> Result<Option<Vec<String>>, anyhow::Error> {
    let mut error_msgs = Vec::new();

    for file_name in DB_FILE_NAMES {
        let path = path_db.as_ref().join(file_name);
        let path_gz = path_db.as_ref().join(format!("{}.gz", file_name));
        if !path.exists() && !path_gz.exists() {
            error_msgs.push(format!("missing file: {:?} (or {:?})", &path, &path_gz));
        }
    }

    let conf = load_db_conf(&path_db)?;
    if conf.species.is_empty() {
        error_msgs.push("conf.toml lists no species".to_string());
    }
    for species in &conf.species {
        if species.max_rank <= 0.0 {
            error_msgs.push(format!(
                "species {} ({}) has non-positive max_rank {}",
                species.id, &species.name, species.max_rank
            ));
        }
    }

    if error_msgs.is_empty() {
        Ok(None)
    } else {
        Ok(Some(error_msgs))
    }
}

/// Resolve the path of the database file `file_name`, preferring the plain
/// file over its gzip sibling.
pub fn resolve_db_file<P: AsRef<Path>>(path_db: P, file_name: &str) -> std::path::PathBuf {
    let path = path_db.as_ref().join(file_name);
    if path.exists() {
        path
    } else {
        path_db.as_ref().join(format!("{}.gz", file_name))
    }
}
