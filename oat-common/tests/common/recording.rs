use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use oat_common::{HarnessError, HarnessResult, Provision, Requirement};

/// Backend that records every call and fails on demand.
#[derive(Clone, Default)]
pub struct Recording {
    events: Rc<RefCell<Vec<String>>>,
    fail_provision: Rc<RefCell<HashSet<String>>>,
    fail_teardown: Rc<RefCell<HashSet<String>>>,
}

impl Recording {
    pub fn fail_provision_of(&self, identity: &str) {
        self.fail_provision.borrow_mut().insert(identity.to_string());
    }

    pub fn fail_teardown_of(&self, identity: &str) {
        self.fail_teardown.borrow_mut().insert(identity.to_string());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    /// Identities passed to `provision`, in call order.
    pub fn provisioned(&self) -> Vec<String> {
        self.with_prefix("provision:")
    }

    /// Identities passed to `teardown`, in call order.
    pub fn torn_down(&self) -> Vec<String> {
        self.with_prefix("teardown:")
    }

    fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| e.strip_prefix(prefix).map(str::to_string))
            .collect()
    }
}

impl Provision for Recording {
    async fn provision(&self, requirement: &Requirement) -> HarnessResult<()> {
        let id = requirement.identity().to_string();
        self.events.borrow_mut().push(format!("provision:{id}"));
        if self.fail_provision.borrow().contains(&id) {
            return Err(HarnessError::Config(format!("injected provisioning failure for {id}")));
        }
        Ok(())
    }

    async fn teardown(&self, requirement: &Requirement) -> HarnessResult<()> {
        let id = requirement.identity().to_string();
        self.events.borrow_mut().push(format!("teardown:{id}"));
        if self.fail_teardown.borrow().contains(&id) {
            return Err(HarnessError::Config(format!("injected teardown failure for {id}")));
        }
        Ok(())
    }
}
