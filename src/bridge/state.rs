//! Per-isolate bridge state.
//!
//! Lives in a context slot as an `Rc`, so callbacks reach it through
//! [`BridgeState::current`]. Finalizers only ever see the isolate, so the
//! registries they touch are captured separately as `rc::Weak`s.

use super::memory::RegionLedger;
use super::types::TypeMetadata;
use super::weak_ref::PairArena;
use super::wrapper::WrapperRegistry;
use crate::config::AttachMode;
use crate::error::{BridgeError, Result};
use std::cell::RefCell;
use std::rc::Rc;

/// Snapshot of bridge bookkeeping, see [`crate::Runtime::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub wrappers_adopted: u64,
    pub wrappers_finalized: u64,
    pub wrappers_detached: u64,
    pub wrappers_live: usize,
    pub regions_allocated: u64,
    pub regions_freed: u64,
    pub region_bytes_live: usize,
    pub weak_pairs_created: u64,
    pub weak_pairs_released: u64,
    pub weak_pairs_live: usize,
}

impl BridgeStats {
    pub fn regions_live(&self) -> u64 {
        self.regions_allocated - self.regions_freed
    }
}

#[derive(Default)]
struct Templates {
    reference: Option<v8::Global<v8::FunctionTemplate>>,
    pointer: Option<v8::Global<v8::FunctionTemplate>>,
}

pub struct BridgeState {
    pub metadata: Box<dyn TypeMetadata>,
    pub attach_mode: AttachMode,
    pub ledger: Rc<RegionLedger>,
    pub wrappers: Rc<WrapperRegistry>,
    pub weak_pairs: Rc<PairArena>,
    templates: RefCell<Templates>,
}

impl BridgeState {
    pub fn new(metadata: Box<dyn TypeMetadata>, attach_mode: AttachMode) -> Rc<Self> {
        Rc::new(Self {
            metadata,
            attach_mode,
            ledger: Rc::new(RegionLedger::default()),
            wrappers: WrapperRegistry::new(),
            weak_pairs: Rc::new(PairArena::default()),
            templates: RefCell::new(Templates::default()),
        })
    }

    /// State installed in the current context.
    pub fn current(scope: &mut v8::PinScope) -> Result<Rc<Self>> {
        scope
            .get_current_context()
            .get_slot::<BridgeState>()
            .ok_or_else(|| {
                BridgeError::InternalInvariantViolation(
                    "bridge state is not installed in this context".to_string(),
                )
            })
    }

    pub fn install(self: &Rc<Self>, scope: &mut v8::PinScope) {
        scope.get_current_context().set_slot(self.clone());
    }

    pub fn internal_field_count(&self) -> usize {
        match self.attach_mode {
            AttachMode::PreferInternalField => 1,
            AttachMode::PrivateKeyOnly => 0,
        }
    }

    pub fn set_reference_template(&self, template: v8::Global<v8::FunctionTemplate>) {
        self.templates.borrow_mut().reference = Some(template);
    }

    pub fn set_pointer_template(&self, template: v8::Global<v8::FunctionTemplate>) {
        self.templates.borrow_mut().pointer = Some(template);
    }

    pub fn reference_template<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
    ) -> Result<v8::Local<'s, v8::FunctionTemplate>> {
        let template = self.templates.borrow().reference.clone();
        Self::localize(scope, template, "Reference")
    }

    pub fn pointer_template<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
    ) -> Result<v8::Local<'s, v8::FunctionTemplate>> {
        let template = self.templates.borrow().pointer.clone();
        Self::localize(scope, template, "Pointer")
    }

    fn localize<'s>(
        scope: &mut v8::PinScope<'s, '_>,
        template: Option<v8::Global<v8::FunctionTemplate>>,
        name: &str,
    ) -> Result<v8::Local<'s, v8::FunctionTemplate>> {
        template
            .map(|global| v8::Local::new(scope, &global))
            .ok_or_else(|| {
                BridgeError::InternalInvariantViolation(format!("{name} template is not installed"))
            })
    }

    pub fn stats(&self) -> BridgeStats {
        let wrappers = self.wrappers.counts();
        let pairs = self.weak_pairs.counts();

        BridgeStats {
            wrappers_adopted: wrappers.adopted,
            wrappers_finalized: wrappers.finalized,
            wrappers_detached: wrappers.detached,
            wrappers_live: wrappers.live,
            regions_allocated: self.ledger.allocated(),
            regions_freed: self.ledger.freed(),
            region_bytes_live: self.ledger.live_bytes(),
            weak_pairs_created: pairs.created,
            weak_pairs_released: pairs.released,
            weak_pairs_live: pairs.live,
        }
    }

    /// Drop every engine handle and free every live payload.
    ///
    /// Called by the runtime before the isolate is disposed.
    pub fn teardown(&self) {
        self.weak_pairs.clear();
        self.wrappers.clear();

        let templates = std::mem::take(&mut *self.templates.borrow_mut());
        drop(templates);
    }
}
