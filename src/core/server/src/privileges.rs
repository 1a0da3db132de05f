// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Role-based access control: the user database, per-connection privilege
//! contexts, and the generation tag which lets contexts detect that they
//! have gone stale and must be rebuilt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Privilege {
    Read = 0,
    Insert = 1,
    Upsert = 2,
    Delete = 3,
    XattrRead = 4,
    XattrWrite = 5,
    SystemXattrRead = 6,
    SystemXattrWrite = 7,
    MetaRead = 8,
    SimpleStats = 9,
    DcpProducer = 10,
    DcpConsumer = 11,
    Audit = 12,
    BucketManagement = 13,
    SecurityManagement = 14,
    Administrator = 15,
}

impl Privilege {
    pub const ALL: &'static [Privilege] = &[
        Privilege::Read,
        Privilege::Insert,
        Privilege::Upsert,
        Privilege::Delete,
        Privilege::XattrRead,
        Privilege::XattrWrite,
        Privilege::SystemXattrRead,
        Privilege::SystemXattrWrite,
        Privilege::MetaRead,
        Privilege::SimpleStats,
        Privilege::DcpProducer,
        Privilege::DcpConsumer,
        Privilege::Audit,
        Privilege::BucketManagement,
        Privilege::SecurityManagement,
        Privilege::Administrator,
    ];

    fn parse(name: &str) -> Option<Privilege> {
        Privilege::ALL
            .iter()
            .copied()
            .find(|p| format!("{:?}", p).eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrivilegeMask(u32);

impl PrivilegeMask {
    pub const NONE: PrivilegeMask = PrivilegeMask(0);
    pub const FULL: PrivilegeMask = PrivilegeMask(u32::MAX);

    pub fn with(mut self, privilege: Privilege) -> Self {
        self.0 |= 1 << privilege as u32;
        self
    }

    pub fn contains(&self, privilege: Privilege) -> bool {
        self.0 & (1 << Privilege::Administrator as u32) != 0
            || self.0 & (1 << privilege as u32) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Local,
    External,
}

#[derive(Debug, Clone)]
pub struct UserEntry {
    pub password: Option<String>,
    pub domain: Domain,
    /// Per-bucket privileges; the key "*" applies to every bucket.
    pub buckets: HashMap<String, PrivilegeMask>,
    /// Privileges not scoped to a bucket.
    pub global: PrivilegeMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Ok,
    Fail,
    /// The context was built against an older generation of the database;
    /// rebuild and retry.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    UnknownUser,
    BadPassword,
    WrongDomain,
}

/// Snapshot of a {user, domain, bucket} privilege set, tagged with the
/// database generation it was derived from.
#[derive(Debug, Clone, Copy)]
pub struct PrivilegeContext {
    generation: u32,
    mask: PrivilegeMask,
}

impl PrivilegeContext {
    pub fn empty(generation: u32) -> Self {
        Self { generation, mask: PrivilegeMask::NONE }
    }

    pub fn check(&self, privilege: Privilege, db: &PrivilegeDb) -> CheckResult {
        if self.generation != db.generation() {
            return CheckResult::Stale;
        }
        if self.mask.contains(privilege) {
            CheckResult::Ok
        } else {
            CheckResult::Fail
        }
    }

    /// A privilege probe which does not distinguish staleness; used where
    /// the caller has just rebuilt the context.
    pub fn holds(&self, privilege: Privilege) -> bool {
        self.mask.contains(privilege)
    }

    /// Remove a privilege from the effective set until the context is next
    /// rebuilt.
    pub fn drop_privilege(&mut self, privilege: Privilege) {
        self.mask.0 &= !(1 << privilege as u32);
    }
}

pub struct PrivilegeDb {
    users: RwLock<HashMap<String, UserEntry>>,
    generation: AtomicU32,
}

impl PrivilegeDb {
    /// A database with the single passwordless "default" user holding full
    /// privileges on the "default" bucket. Used when no user db file is
    /// configured.
    pub fn with_default_user() -> Self {
        let mut users = HashMap::new();
        let mut buckets = HashMap::new();
        buckets.insert("default".to_string(), PrivilegeMask::FULL);
        users.insert(
            "default".to_string(),
            UserEntry {
                password: None,
                domain: Domain::Local,
                buckets,
                global: PrivilegeMask::NONE,
            },
        );
        Self {
            users: RwLock::new(users),
            generation: AtomicU32::new(1),
        }
    }

    /// Load a JSON user database:
    /// `{"users": {"name": {"password": "...", "domain": "local",
    ///   "buckets": {"default": ["Read", "Upsert"]}, "global": ["Audit"]}}}`
    pub fn from_json(json: &serde_json::Value) -> Result<Self, String> {
        let mut users = HashMap::new();

        let entries = json
            .get("users")
            .and_then(|u| u.as_object())
            .ok_or_else(|| "user db missing \"users\" object".to_string())?;

        for (name, entry) in entries {
            let password = entry
                .get("password")
                .and_then(|p| p.as_str())
                .map(|p| p.to_string());
            let domain = match entry.get("domain").and_then(|d| d.as_str()) {
                Some("external") => Domain::External,
                _ => Domain::Local,
            };

            let mut buckets = HashMap::new();
            if let Some(map) = entry.get("buckets").and_then(|b| b.as_object()) {
                for (bucket, privileges) in map {
                    buckets.insert(bucket.clone(), parse_mask(privileges)?);
                }
            }
            let global = match entry.get("global") {
                Some(privileges) => parse_mask(privileges)?,
                None => PrivilegeMask::NONE,
            };

            users.insert(
                name.clone(),
                UserEntry { password, domain, buckets, global },
            );
        }

        Ok(Self {
            users: RwLock::new(users),
            generation: AtomicU32::new(1),
        })
    }

    pub fn load(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let json: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| e.to_string())?;
        Self::from_json(&json)
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate every outstanding privilege context.
    pub fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn authenticate(&self, user: &str, password: &str) -> Result<Domain, AuthFailure> {
        let users = self.users.read().map_err(|_| AuthFailure::UnknownUser)?;
        let entry = users.get(user).ok_or(AuthFailure::UnknownUser)?;
        if entry.domain == Domain::External {
            return Err(AuthFailure::WrongDomain);
        }
        match &entry.password {
            Some(expected) if expected == password => Ok(entry.domain),
            None if password.is_empty() => Ok(entry.domain),
            _ => Err(AuthFailure::BadPassword),
        }
    }

    /// Record or replace an external user pushed by the auth provider.
    pub fn update_external_user(&self, name: &str, entry: UserEntry) {
        if let Ok(mut users) = self.users.write() {
            users.insert(name.to_string(), entry);
        }
        self.bump_generation();
    }

    /// Build a privilege context for the given identity against the named
    /// bucket ("" for no bucket). An unknown user yields an empty context.
    pub fn create_context(&self, user: Option<&str>, bucket: &str) -> PrivilegeContext {
        let generation = self.generation();
        let user = match user {
            Some(user) => user,
            None => return PrivilegeContext::empty(generation),
        };

        let users = match self.users.read() {
            Ok(users) => users,
            Err(_) => return PrivilegeContext::empty(generation),
        };
        let entry = match users.get(user) {
            Some(entry) => entry,
            None => return PrivilegeContext::empty(generation),
        };

        let mut mask = entry.global;
        if !bucket.is_empty() {
            if let Some(bucket_mask) = entry.buckets.get(bucket).or_else(|| entry.buckets.get("*"))
            {
                mask.0 |= bucket_mask.0;
            }
        }

        PrivilegeContext { generation, mask }
    }

    pub fn user_may_access_bucket(&self, user: Option<&str>, bucket: &str) -> bool {
        !self.create_context(user, bucket).mask.is_empty()
    }
}

fn parse_mask(privileges: &serde_json::Value) -> Result<PrivilegeMask, String> {
    let list = privileges
        .as_array()
        .ok_or_else(|| "privilege list must be an array".to_string())?;
    let mut mask = PrivilegeMask::NONE;
    for name in list {
        let name = name
            .as_str()
            .ok_or_else(|| "privilege name must be a string".to_string())?;
        let privilege = Privilege::parse(name)
            .ok_or_else(|| format!("unknown privilege: {}", name))?;
        mask = mask.with(privilege);
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_user_has_full_bucket_privileges() {
        let db = PrivilegeDb::with_default_user();
        let ctx = db.create_context(Some("default"), "default");
        assert_eq!(ctx.check(Privilege::Read, &db), CheckResult::Ok);
        assert_eq!(ctx.check(Privilege::DcpProducer, &db), CheckResult::Ok);

        let ctx = db.create_context(Some("default"), "");
        assert_eq!(ctx.check(Privilege::Read, &db), CheckResult::Fail);
    }

    #[test]
    fn stale_context_detected() {
        let db = PrivilegeDb::with_default_user();
        let ctx = db.create_context(Some("default"), "default");
        db.bump_generation();
        assert_eq!(ctx.check(Privilege::Read, &db), CheckResult::Stale);
        let ctx = db.create_context(Some("default"), "default");
        assert_eq!(ctx.check(Privilege::Read, &db), CheckResult::Ok);
    }

    #[test]
    fn json_db() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{
                "users": {
                    "alice": {
                        "password": "secret",
                        "buckets": {"default": ["Read", "Upsert"]},
                        "global": ["SimpleStats"]
                    },
                    "bob": {"domain": "external", "buckets": {"*": ["Read"]}}
                }
            }"#,
        )
        .unwrap();
        let db = PrivilegeDb::from_json(&json).unwrap();

        assert_eq!(db.authenticate("alice", "secret"), Ok(Domain::Local));
        assert_eq!(db.authenticate("alice", "wrong"), Err(AuthFailure::BadPassword));
        assert_eq!(db.authenticate("carol", "x"), Err(AuthFailure::UnknownUser));
        assert_eq!(db.authenticate("bob", "x"), Err(AuthFailure::WrongDomain));

        let ctx = db.create_context(Some("alice"), "default");
        assert!(ctx.holds(Privilege::Read));
        assert!(ctx.holds(Privilege::SimpleStats));
        assert!(!ctx.holds(Privilege::Delete));

        // wildcard bucket entry
        let ctx = db.create_context(Some("bob"), "other");
        assert!(ctx.holds(Privilege::Read));
    }

    #[test]
    fn administrator_implies_everything() {
        let mask = PrivilegeMask::NONE.with(Privilege::Administrator);
        assert!(mask.contains(Privilege::Read));
        assert!(mask.contains(Privilege::SecurityManagement));
    }
}
