use std::collections::HashMap;
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime};

use lazy_static::lazy_static;
use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::autocomplete::MasterLookup;
use crate::error::PortalError;
use crate::formula::{Formula, FormulaStatus};
use crate::ingredient::MasterIngredient;
use crate::login::User;
use crate::review::Review;

const FORMULAS_FILE: &str = "formulas.json";
const REVIEWS_FILE: &str = "reviews.json";
const MASTER_FILE: &str = "master.json";
const USERS_FILE: &str = "users.json";
const UPLOADS_DIR: &str = "uploads";
const REPORTS_DIR: &str = "reports";

/// Master bulk uploads are written in batches of this many records.
pub const MASTER_BATCH_SIZE: usize = 100;

/// A signed, expiring download link.
struct SignedUrl {
    path: PathBuf,
    expires_at: SystemTime,
}

lazy_static! {
    /// Active signed download links, keyed by token.
    static ref SIGNED_URLS: RwLock<HashMap<String, SignedUrl>> = RwLock::new(HashMap::new());
}

/// File-backed record store for the portal.
///
/// Each entity lives in one JSON file under the data directory and is
/// read and rewritten whole on every operation. Writers serialize on
/// the internal mutex, which is what makes conditional status updates
/// (check the current state, then write) safe against concurrent
/// requests. Readers do not take the lock.
pub struct Store {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl Store {
    /// Open a store rooted at `root`, creating the directory layout and
    /// empty record files on first use.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, PortalError> {
        let root = root.into();
        create_dir_all(root.join(UPLOADS_DIR)).map_err(PortalError::io)?;
        create_dir_all(root.join(REPORTS_DIR)).map_err(PortalError::io)?;

        let store = Store {
            root,
            write_lock: Mutex::new(()),
        };

        for file in [FORMULAS_FILE, REVIEWS_FILE, USERS_FILE] {
            let path = store.root.join(file);
            if !path.exists() {
                fs::write(&path, "{}").map_err(PortalError::io)?;
            }
        }
        let master = store.root.join(MASTER_FILE);
        if !master.exists() {
            fs::write(&master, "[]").map_err(PortalError::io)?;
        }

        Ok(store)
    }

    fn read_json<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T, PortalError> {
        let path = self.root.join(file);
        if !path.exists() {
            return Ok(T::default());
        }
        let contents = fs::read_to_string(&path).map_err(PortalError::io)?;
        serde_json::from_str(&contents).map_err(|e| PortalError::External(Box::new(e)))
    }

    fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<(), PortalError> {
        let json = serde_json::to_string_pretty(value).map_err(|e| PortalError::External(Box::new(e)))?;
        fs::write(self.root.join(file), json).map_err(PortalError::io)
    }

    // ----- formulas -----

    pub fn insert_formula(&self, formula: &Formula) -> Result<(), PortalError> {
        let _guard = self.write_lock.lock().unwrap();
        let mut formulas: HashMap<String, Formula> = self.read_json(FORMULAS_FILE)?;
        formulas.insert(formula.id.clone(), formula.clone());
        self.write_json(FORMULAS_FILE, &formulas)
    }

    pub fn get_formula(&self, id: &str) -> Result<Formula, PortalError> {
        let formulas: HashMap<String, Formula> = self.read_json(FORMULAS_FILE)?;
        formulas
            .get(id)
            .cloned()
            .ok_or_else(|| PortalError::NotFound("Formula not found".to_string()))
    }

    /// All formulas, newest first.
    pub fn list_formulas(&self) -> Result<Vec<Formula>, PortalError> {
        let formulas: HashMap<String, Formula> = self.read_json(FORMULAS_FILE)?;
        let mut list: Vec<Formula> = formulas.into_values().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    /// One customer's formulas, newest first.
    pub fn list_formulas_for(&self, customer_id: &str) -> Result<Vec<Formula>, PortalError> {
        let mut list = self.list_formulas()?;
        list.retain(|f| f.customer_id == customer_id);
        Ok(list)
    }

    /// Conditionally update a formula.
    ///
    /// The mutation only runs while the formula's current status is one
    /// of `expected`; otherwise the call fails with a conflict and
    /// nothing is written. This is the compare-and-swap every workflow
    /// transition goes through, so two racing requests cannot both
    /// apply the same transition.
    pub fn update_formula_if<F>(
        &self,
        id: &str,
        expected: &[FormulaStatus],
        mutate: F,
    ) -> Result<Formula, PortalError>
    where
        F: FnOnce(&mut Formula) -> Result<(), PortalError>,
    {
        let _guard = self.write_lock.lock().unwrap();
        let mut formulas: HashMap<String, Formula> = self.read_json(FORMULAS_FILE)?;

        let formula = formulas
            .get_mut(id)
            .ok_or_else(|| PortalError::NotFound("Formula not found".to_string()))?;

        if !expected.contains(&formula.status) {
            return Err(PortalError::Conflict(format!(
                "Formula is {} and no longer accepts this action",
                formula.status
            )));
        }

        mutate(formula)?;
        formula.updated_at = chrono::Utc::now();
        let updated = formula.clone();

        self.write_json(FORMULAS_FILE, &formulas)?;
        Ok(updated)
    }

    /// Delete a formula along with its review and stored upload.
    pub fn delete_formula(&self, id: &str) -> Result<(), PortalError> {
        let _guard = self.write_lock.lock().unwrap();

        let mut formulas: HashMap<String, Formula> = self.read_json(FORMULAS_FILE)?;
        let formula = formulas
            .remove(id)
            .ok_or_else(|| PortalError::NotFound("Formula not found".to_string()))?;
        self.write_json(FORMULAS_FILE, &formulas)?;

        let mut reviews: HashMap<String, Review> = self.read_json(REVIEWS_FILE)?;
        if reviews.remove(id).is_some() {
            self.write_json(REVIEWS_FILE, &reviews)?;
        }

        let upload = self.upload_path(&formula.file_path);
        if upload.exists() {
            fs::remove_file(upload).map_err(PortalError::io)?;
        }

        info!("deleted formula {id} and its review");
        Ok(())
    }

    // ----- reviews -----

    pub fn get_review(&self, formula_id: &str) -> Result<Option<Review>, PortalError> {
        let reviews: HashMap<String, Review> = self.read_json(REVIEWS_FILE)?;
        Ok(reviews.get(formula_id).cloned())
    }

    pub fn upsert_review(&self, review: &Review) -> Result<(), PortalError> {
        let _guard = self.write_lock.lock().unwrap();
        let mut reviews: HashMap<String, Review> = self.read_json(REVIEWS_FILE)?;
        reviews.insert(review.formula_id.clone(), review.clone());
        self.write_json(REVIEWS_FILE, &reviews)
    }

    // ----- master table -----

    /// Replace the entire master table with `records`.
    ///
    /// The existing table is deleted first, then records land in
    /// batches of [`MASTER_BATCH_SIZE`]. The window is not
    /// transactional: a reader between batches can observe an empty or
    /// partially-populated table. Known gap, matching the original
    /// upload behavior.
    pub fn replace_master(&self, records: &[MasterIngredient]) -> Result<usize, PortalError> {
        let _guard = self.write_lock.lock().unwrap();

        let mut stored: Vec<MasterIngredient> = Vec::with_capacity(records.len());
        self.write_json(MASTER_FILE, &stored)?;

        for chunk in records.chunks(MASTER_BATCH_SIZE) {
            stored.extend_from_slice(chunk);
            self.write_json(MASTER_FILE, &stored)?;
        }

        info!("master table replaced with {} records", stored.len());
        Ok(stored.len())
    }

    pub fn master_count(&self) -> Result<usize, PortalError> {
        let records: Vec<MasterIngredient> = self.read_json(MASTER_FILE)?;
        Ok(records.len())
    }

    // ----- users -----

    pub fn get_user(&self, username: &str) -> Result<Option<User>, PortalError> {
        let users: HashMap<String, User> = self.read_json(USERS_FILE)?;
        Ok(users.get(username).cloned())
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>, PortalError> {
        let users: HashMap<String, User> = self.read_json(USERS_FILE)?;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    /// Insert a new user, rejecting duplicate usernames and addresses.
    pub fn insert_user(&self, user: &User) -> Result<(), PortalError> {
        let _guard = self.write_lock.lock().unwrap();
        let mut users: HashMap<String, User> = self.read_json(USERS_FILE)?;

        if users.contains_key(&user.username) {
            return Err(PortalError::Validation("Username already exists".to_string()));
        }
        if users.values().any(|u| u.email == user.email) {
            return Err(PortalError::Validation(
                "Email address is already registered".to_string(),
            ));
        }

        users.insert(user.username.clone(), user.clone());
        self.write_json(USERS_FILE, &users)
    }

    pub fn update_user<F>(&self, username: &str, mutate: F) -> Result<User, PortalError>
    where
        F: FnOnce(&mut User),
    {
        let _guard = self.write_lock.lock().unwrap();
        let mut users: HashMap<String, User> = self.read_json(USERS_FILE)?;

        let user = users
            .get_mut(username)
            .ok_or_else(|| PortalError::NotFound("User not found".to_string()))?;
        mutate(user);
        let updated = user.clone();

        self.write_json(USERS_FILE, &users)?;
        Ok(updated)
    }

    // ----- file storage -----

    /// Store an uploaded workbook and return its stored filename.
    pub fn save_upload(&self, original_filename: &str, bytes: &[u8]) -> Result<String, PortalError> {
        let extension = Path::new(original_filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("xlsx");
        let name = format!("{}.{extension}", Uuid::new_v4());

        fs::write(self.root.join(UPLOADS_DIR).join(&name), bytes).map_err(PortalError::io)?;
        Ok(name)
    }

    pub fn upload_path(&self, file_path: &str) -> PathBuf {
        self.root.join(UPLOADS_DIR).join(file_path)
    }

    pub fn read_upload(&self, file_path: &str) -> Result<Vec<u8>, PortalError> {
        fs::read(self.upload_path(file_path)).map_err(PortalError::io)
    }

    /// Store a generated report and return its full path.
    pub fn save_report(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, PortalError> {
        let path = self.root.join(REPORTS_DIR).join(filename);
        fs::write(&path, bytes).map_err(PortalError::io)?;
        Ok(path)
    }

    pub fn report_path(&self, filename: &str) -> PathBuf {
        self.root.join(REPORTS_DIR).join(filename)
    }
}

impl MasterLookup for Store {
    fn find_by_cas(&self, cas: &str) -> Result<Option<MasterIngredient>, PortalError> {
        let records: Vec<MasterIngredient> = self.read_json(MASTER_FILE)?;
        Ok(records.into_iter().find(|r| r.cas_number == cas.trim()))
    }
}

/// Issue a tokenized download link for `path`, valid for `ttl`.
pub fn create_signed_url(path: &Path, ttl: Duration) -> String {
    let token = Uuid::new_v4().to_string();
    let entry = SignedUrl {
        path: path.to_path_buf(),
        expires_at: SystemTime::now() + ttl,
    };

    let mut urls = SIGNED_URLS.write().unwrap();
    urls.insert(token.clone(), entry);

    format!("/files/signed/{token}")
}

/// Resolve a signed-link token back to its file, if still valid.
pub fn resolve_signed_url(token: &str) -> Option<PathBuf> {
    let urls = SIGNED_URLS.read().unwrap();

    if let Some(entry) = urls.get(token) {
        if entry.expires_at > SystemTime::now() {
            return Some(entry.path.clone());
        }
    }

    None
}
