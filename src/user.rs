//! End users that flags are evaluated for.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An end user. `key` identifies the user and is what bucketing and individual targeting use.
///
/// Built-in properties (`key`, `userName`, `email`, `country`) are addressed by those names in
/// clauses; everything else is looked up in custom properties.
///
/// # Examples
/// ```
/// # use ffc_core::FfcUser;
/// let user = FfcUser::builder("user-1")
///     .user_name("Alice")
///     .country("FR")
///     .custom("plan", "premium")
///     .build();
/// assert_eq!(user.property("country"), Some("FR"));
/// assert_eq!(user.property("plan"), Some("premium"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FfcUser {
    key: String,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    custom: HashMap<String, String>,
}

impl FfcUser {
    pub fn new(key: impl Into<String>) -> FfcUser {
        FfcUser::builder(key).build()
    }

    pub fn builder(key: impl Into<String>) -> FfcUserBuilder {
        FfcUserBuilder {
            user: FfcUser {
                key: key.into(),
                user_name: None,
                email: None,
                country: None,
                custom: HashMap::new(),
            },
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn custom(&self) -> &HashMap<String, String> {
        &self.custom
    }

    /// Look up a property by name.
    ///
    /// Built-ins are always present (unset ones read as an empty string). Custom properties are
    /// `None` when absent.
    pub fn property(&self, name: &str) -> Option<&str> {
        let builtin = match name {
            "key" => return Some(&self.key),
            "userName" | "username" => &self.user_name,
            "email" => &self.email,
            "country" => &self.country,
            _ => return self.custom.get(name).map(String::as_str),
        };
        Some(builtin.as_deref().unwrap_or(""))
    }
}

pub struct FfcUserBuilder {
    user: FfcUser,
}

impl FfcUserBuilder {
    pub fn user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user.user_name = Some(user_name.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.user.email = Some(email.into());
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.user.country = Some(country.into());
        self
    }

    /// Set a custom property. A custom property named like a built-in is shadowed by it.
    pub fn custom(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user.custom.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> FfcUser {
        self.user
    }
}

#[cfg(test)]
mod tests {
    use super::FfcUser;

    #[test]
    fn builtin_properties() {
        let user = FfcUser::builder("u1")
            .user_name("Bob")
            .email("bob@example.com")
            .build();
        assert_eq!(user.property("key"), Some("u1"));
        assert_eq!(user.property("userName"), Some("Bob"));
        assert_eq!(user.property("username"), Some("Bob"));
        assert_eq!(user.property("email"), Some("bob@example.com"));
        assert_eq!(user.property("country"), Some(""));
    }

    #[test]
    fn custom_properties() {
        let user = FfcUser::builder("u1").custom("age", "42").build();
        assert_eq!(user.property("age"), Some("42"));
        assert_eq!(user.property("plan"), None);
    }
}
