//! Registry of runnable tests.
//!
//! Tests are registered explicitly by name with a constructor function;
//! [`TestRegistry::with_builtin_tests`] populates the tests shipped with the
//! crate at process start.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::TestConfig;
use crate::models::role::{RoleType, SessionRole, TEST_CONTROLLER_FLAG};
use crate::{AppError, Result};

/// A runnable test: how its roles are derived from configuration.
pub trait TestDefinition: Send + Sync {
    /// Registered name.
    fn name(&self) -> &str;

    /// Roles of one pass, derived from the configured roles.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configured roles cannot run this test.
    fn roles(&self, config: &TestConfig) -> Result<Vec<SessionRole>>;

    /// Log categories surfaced while ticking, beyond the configured ones.
    fn attention_categories(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Constructor of a registered test.
pub type TestConstructor = fn() -> Box<dyn TestDefinition>;

/// Name-to-constructor map of runnable tests.
#[derive(Default)]
pub struct TestRegistry {
    constructors: BTreeMap<String, TestConstructor>,
}

impl TestRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in test.
    #[must_use]
    pub fn with_builtin_tests() -> Self {
        let mut registry = Self::new();
        registry
            .constructors
            .insert(BootTest::NAME.to_owned(), || Box::new(BootTest));
        registry
            .constructors
            .insert(ClientServerTest::NAME.to_owned(), || Box::new(ClientServerTest));
        registry
            .constructors
            .insert(EditorBootTest::NAME.to_owned(), || Box::new(EditorBootTest));
        registry
    }

    /// Register a test under `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the name is already registered.
    pub fn register(&mut self, name: &str, constructor: TestConstructor) -> Result<()> {
        if self.constructors.contains_key(name) {
            return Err(AppError::Config(format!("test already registered: {name}")));
        }
        self.constructors.insert(name.to_owned(), constructor);
        debug!(test = name, "test registered");
        Ok(())
    }

    /// Construct the test registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no test has that name.
    pub fn create(&self, name: &str) -> Result<Box<dyn TestDefinition>> {
        self.constructors
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| AppError::NotFound(format!("no test registered as {name}")))
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

/// Mark roles matching `drives_test` with `-gauntlet=<test>`.
fn with_controller(
    roles: &[SessionRole],
    test_name: &str,
    drives_test: impl Fn(&SessionRole) -> bool,
) -> Vec<SessionRole> {
    roles
        .iter()
        .cloned()
        .map(|mut role| {
            if drives_test(&role) && !role.is_null() && !role.uses_test_controller() {
                role.command_line.set_value(TEST_CONTROLLER_FLAG, test_name);
            }
            role
        })
        .collect()
}

/// Boots every configured role and waits for the controller verdict.
#[derive(Debug, Clone, Copy)]
pub struct BootTest;

impl BootTest {
    /// Registered name.
    pub const NAME: &'static str = "BootTest";
}

impl TestDefinition for BootTest {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn roles(&self, config: &TestConfig) -> Result<Vec<SessionRole>> {
        Ok(with_controller(&config.roles, Self::NAME, |role| {
            (role.role_type.is_client() || role.role_type.uses_editor())
                && !role.install_only
                && !role.is_dummy()
        }))
    }

    fn attention_categories(&self) -> Vec<String> {
        vec!["LogInit".into()]
    }
}

/// Clients connecting to a dedicated server.
#[derive(Debug, Clone, Copy)]
pub struct ClientServerTest;

impl ClientServerTest {
    /// Registered name.
    pub const NAME: &'static str = "ClientServer";
}

impl TestDefinition for ClientServerTest {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn roles(&self, config: &TestConfig) -> Result<Vec<SessionRole>> {
        let has_server = config
            .roles
            .iter()
            .any(|r| r.role_type == RoleType::Server && !r.is_null());
        let has_client = config
            .roles
            .iter()
            .any(|r| r.role_type.is_client() && !r.is_null());
        if !has_server || !has_client {
            return Err(AppError::Config(format!(
                "{} needs at least one client and one server role",
                Self::NAME
            )));
        }
        Ok(with_controller(&config.roles, Self::NAME, |role| {
            role.role_type.is_client()
        }))
    }

    fn attention_categories(&self) -> Vec<String> {
        vec!["LogNet".into()]
    }
}

/// Boots the editor.
#[derive(Debug, Clone, Copy)]
pub struct EditorBootTest;

impl EditorBootTest {
    /// Registered name.
    pub const NAME: &'static str = "EditorBoot";
}

impl TestDefinition for EditorBootTest {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn roles(&self, config: &TestConfig) -> Result<Vec<SessionRole>> {
        if !config
            .roles
            .iter()
            .any(|r| r.role_type.uses_editor() && !r.is_null())
        {
            return Err(AppError::Config(format!(
                "{} needs an editor role",
                Self::NAME
            )));
        }
        Ok(with_controller(&config.roles, Self::NAME, |role| {
            role.role_type.uses_editor()
        }))
    }
}
