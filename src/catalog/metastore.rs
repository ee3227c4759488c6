use crate::admin::command::{ColumnName, CommentTarget, ObjectPrivilege, SystemPrivilege};
use crate::{OctopusError, Result};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub name: String,
    // Stored and compared as given; no hashing.
    pub password: String,
    pub system_privileges: BTreeSet<SystemPrivilege>,
}

/// An object privilege held on one schema.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchemaPrivilege {
    pub data_source: String,
    pub schema: String,
    pub privilege: ObjectPrivilege,
}

/// Users, roles, privileges, comments and data categories.
///
/// Every mutating method validates its whole input before changing
/// anything, so a failed command leaves the store untouched.
#[derive(Debug, Default)]
pub struct MetaStore {
    users: BTreeMap<String, UserRecord>,
    roles: BTreeSet<String>,
    object_privileges: BTreeMap<String, BTreeSet<SchemaPrivilege>>,
    comments: BTreeMap<CommentTarget, String>,
    data_categories: BTreeMap<ColumnName, String>,
}

fn user_not_found(name: &str) -> OctopusError {
    OctopusError::UndefinedObject(format!("user \"{name}\" does not exist"))
}

impl MetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, name: &str) -> Option<&UserRecord> {
        self.users.get(name)
    }

    pub fn users(&self) -> impl Iterator<Item = &UserRecord> {
        self.users.values()
    }

    pub fn create_user(&mut self, name: &str, password: &str) -> Result<()> {
        if self.users.contains_key(name) {
            return Err(OctopusError::DuplicateObject(format!("user \"{name}\" already exists")));
        }
        self.users.insert(
            name.to_string(),
            UserRecord {
                name: name.to_string(),
                password: password.to_string(),
                system_privileges: BTreeSet::new(),
            },
        );
        Ok(())
    }

    pub fn alter_user(&mut self, name: &str, password: &str, old_password: Option<&str>) -> Result<()> {
        let user = self.users.get_mut(name).ok_or_else(|| user_not_found(name))?;
        if let Some(old) = old_password {
            if user.password != old {
                return Err(OctopusError::InvalidPassword(name.to_string()));
            }
        }
        user.password = password.to_string();
        Ok(())
    }

    pub fn drop_user(&mut self, name: &str) -> Result<()> {
        self.users.remove(name).ok_or_else(|| user_not_found(name))?;
        self.object_privileges.remove(name);
        self.comments.remove(&CommentTarget::User(name.to_string()));
        Ok(())
    }

    pub fn create_role(&mut self, name: &str) -> Result<()> {
        if !self.roles.insert(name.to_string()) {
            return Err(OctopusError::DuplicateObject(format!("role \"{name}\" already exists")));
        }
        Ok(())
    }

    pub fn drop_role(&mut self, name: &str) -> Result<()> {
        if !self.roles.remove(name) {
            return Err(OctopusError::UndefinedObject(format!("role \"{name}\" does not exist")));
        }
        Ok(())
    }

    pub fn roles(&self) -> impl Iterator<Item = &String> {
        self.roles.iter()
    }

    fn check_users(&self, names: &[String]) -> Result<()> {
        match names.iter().find(|n| !self.users.contains_key(n.as_str())) {
            Some(missing) => Err(user_not_found(missing)),
            None => Ok(()),
        }
    }

    pub fn grant_system_privileges(&mut self, privileges: &[SystemPrivilege], grantees: &[String]) -> Result<()> {
        self.check_users(grantees)?;
        for name in grantees {
            if let Some(user) = self.users.get_mut(name) {
                user.system_privileges.extend(privileges.iter().copied());
            }
        }
        Ok(())
    }

    pub fn revoke_system_privileges(&mut self, privileges: &[SystemPrivilege], revokees: &[String]) -> Result<()> {
        self.check_users(revokees)?;
        for name in revokees {
            if let Some(user) = self.users.get_mut(name) {
                for privilege in privileges {
                    user.system_privileges.remove(privilege);
                }
            }
        }
        Ok(())
    }

    pub fn grant_object_privileges(
        &mut self,
        privileges: &[ObjectPrivilege],
        data_source: &str,
        schema: &str,
        grantees: &[String],
    ) -> Result<()> {
        self.check_users(grantees)?;
        for name in grantees {
            let held = self.object_privileges.entry(name.clone()).or_default();
            held.extend(privileges.iter().map(|p| SchemaPrivilege {
                data_source: data_source.to_string(),
                schema: schema.to_string(),
                privilege: *p,
            }));
        }
        Ok(())
    }

    pub fn revoke_object_privileges(
        &mut self,
        privileges: &[ObjectPrivilege],
        data_source: &str,
        schema: &str,
        revokees: &[String],
    ) -> Result<()> {
        self.check_users(revokees)?;
        for name in revokees {
            if let Some(held) = self.object_privileges.get_mut(name) {
                held.retain(|p| {
                    !(p.data_source == data_source && p.schema == schema && privileges.contains(&p.privilege))
                });
            }
        }
        Ok(())
    }

    pub fn object_privileges(&self, user: &str) -> Result<Vec<SchemaPrivilege>> {
        if !self.users.contains_key(user) {
            return Err(user_not_found(user));
        }
        Ok(self
            .object_privileges
            .get(user)
            .map(|held| held.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Set a comment; the caller has already checked the target exists.
    pub fn set_comment(&mut self, target: CommentTarget, comment: &str) -> Result<()> {
        if let CommentTarget::User(name) = &target {
            if !self.users.contains_key(name) {
                return Err(user_not_found(name));
            }
        }
        self.comments.insert(target, comment.to_string());
        Ok(())
    }

    pub fn comment(&self, target: &CommentTarget) -> Option<&str> {
        self.comments.get(target).map(String::as_str)
    }

    pub fn comments(&self) -> impl Iterator<Item = (&CommentTarget, &String)> {
        self.comments.iter()
    }

    pub fn set_data_category(&mut self, column: ColumnName, category: &str) {
        self.data_categories.insert(column, category.to_string());
    }

    pub fn data_category(&self, column: &ColumnName) -> Option<&str> {
        self.data_categories.get(column).map(String::as_str)
    }

    /// Drop comments, categories and privileges attached to a data source
    /// that has been removed.
    pub fn forget_data_source(&mut self, data_source: &str) {
        self.comments.retain(|target, _| match target {
            CommentTarget::DataSource(ds) => ds != data_source,
            CommentTarget::Schema { data_source: ds, .. } | CommentTarget::Table { data_source: ds, .. } => {
                ds != data_source
            }
            CommentTarget::Column(column) => column.data_source != data_source,
            CommentTarget::User(_) => true,
        });
        self.data_categories.retain(|column, _| column.data_source != data_source);
        for held in self.object_privileges.values_mut() {
            held.retain(|p| p.data_source != data_source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_user() -> MetaStore {
        let mut store = MetaStore::new();
        store.create_user("octopus", "bitnine").unwrap();
        store
    }

    #[test]
    fn test_user_lifecycle() {
        let mut store = store_with_user();
        assert!(matches!(
            store.create_user("octopus", "x"),
            Err(OctopusError::DuplicateObject(_))
        ));
        store.alter_user("octopus", "secret", Some("bitnine")).unwrap();
        assert_eq!(store.user("octopus").unwrap().password, "secret");
        assert!(matches!(
            store.alter_user("octopus", "other", Some("wrong")),
            Err(OctopusError::InvalidPassword(_))
        ));
        store.drop_user("octopus").unwrap();
        assert!(store.user("octopus").is_none());
        assert!(matches!(store.drop_user("octopus"), Err(OctopusError::UndefinedObject(_))));
    }

    #[test]
    fn test_grant_is_all_or_nothing() {
        let mut store = store_with_user();
        let result = store.grant_system_privileges(
            &[SystemPrivilege::CreateUser],
            &["octopus".to_string(), "ghost".to_string()],
        );
        assert!(result.is_err());
        assert!(store.user("octopus").unwrap().system_privileges.is_empty());
    }

    #[test]
    fn test_object_privileges() {
        let mut store = store_with_user();
        let users = vec!["octopus".to_string()];
        store
            .grant_object_privileges(&ObjectPrivilege::ALL, "sales", "__DEFAULT", &users)
            .unwrap();
        assert_eq!(store.object_privileges("octopus").unwrap().len(), 2);
        store
            .revoke_object_privileges(&[ObjectPrivilege::Select], "sales", "__DEFAULT", &users)
            .unwrap();
        let held = store.object_privileges("octopus").unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].privilege, ObjectPrivilege::Comment);

        store.forget_data_source("sales");
        assert!(store.object_privileges("octopus").unwrap().is_empty());
    }

    #[test]
    fn test_roles() {
        let mut store = MetaStore::new();
        store.create_role("analyst").unwrap();
        assert!(store.create_role("analyst").is_err());
        store.drop_role("analyst").unwrap();
        assert!(store.drop_role("analyst").is_err());
    }
}
