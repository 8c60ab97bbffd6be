//! Hook descriptors, the ordered registry, and the activation engine.
//!
//! A descriptor names one patch point in a host module. Descriptors are
//! registered explicitly from a composition root, which fixes the
//! activation order to the order written there. Activation runs once, in
//! that order, and a failure for any descriptor aborts the remainder: a
//! single unmatched signature means a host version mismatch, and a
//! partially patched host must not proceed to startup procedures.

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::module::ModuleResolver;
use crate::pattern::BytePattern;
use crate::scan;

/// How a descriptor's target address is found inside its module image.
#[derive(Debug, Clone)]
pub enum TargetSpec {
    /// Scan the module image for a byte signature.
    Signature(BytePattern),
    /// A fixed offset from the module base, for targets whose entry bytes
    /// are too unstable to sign.
    ImageOffset(usize),
}

/// Called once with the trampoline pointer when a descriptor activates.
/// This is where feature code stashes its typed "call the original"
/// handle; the pointer is valid for the rest of the process's life.
pub type SaveOriginal = fn(*const ());

/// One patch point: where to hook, what to run instead, and the state
/// filled in exactly once by activation. Descriptors are never destroyed
/// while the process lives, so the captured original-function pointer
/// stays valid.
pub struct HookDescriptor {
    pub name: &'static str,
    pub module: &'static str,
    pub target: TargetSpec,
    pub replacement: *const (),
    save_original: Option<SaveOriginal>,
    resolved_target: Option<usize>,
    original: Option<*const ()>,
    activated: bool,
    armed: Option<Box<dyn ArmedHook>>,
}

impl HookDescriptor {
    pub fn new(
        name: &'static str,
        module: &'static str,
        target: TargetSpec,
        replacement: *const (),
    ) -> Self {
        Self {
            name,
            module,
            target,
            replacement,
            save_original: None,
            resolved_target: None,
            original: None,
            activated: false,
            armed: None,
        }
    }

    /// Attach a callback invoked with the trampoline pointer on activation.
    pub fn with_save_original(mut self, save: SaveOriginal) -> Self {
        self.save_original = Some(save);
        self
    }

    /// The address activation resolved for this descriptor, if any.
    pub fn resolved_target(&self) -> Option<usize> {
        self.resolved_target
    }

    /// Trampoline to the original function body. `None` until activation;
    /// calling through it before then is the one thing collaborators must
    /// never do.
    pub fn original(&self) -> Option<*const ()> {
        self.original
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }
}

/// Append-only ordered collection of hook descriptors.
///
/// Populated by explicit `register` calls before activation; consumed by
/// the engine exactly once, in registration order, then read-only.
#[derive(Default)]
pub struct HookRegistry {
    descriptors: Vec<HookDescriptor>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: HookDescriptor) {
        self.descriptors.push(descriptor);
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&HookDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HookDescriptor> {
        self.descriptors.iter()
    }
}

/// A created inline hook that may not have taken effect yet.
pub trait ArmedHook {
    /// Pointer to the trampoline that still runs the original function
    /// body.
    fn trampoline(&self) -> *const ();

    /// Let the redirect take effect. Concurrent callers of the target
    /// observe either fully-original or fully-redirected behavior, never a
    /// torn instruction stream.
    ///
    /// # Safety
    ///
    /// Nothing else may be patching the target's entry bytes.
    unsafe fn enable(&self) -> std::result::Result<(), String>;
}

/// Installs inline hooks. Creation and enabling are split so a later
/// hook's installation cannot destabilize an earlier hook that is already
/// intercepting calls.
pub trait HookBackend {
    /// Create a disabled hook redirecting `target` to `replacement`.
    ///
    /// # Safety
    ///
    /// `target` must be the entry of a function with enough patchable
    /// prologue bytes, and `replacement` must share its ABI.
    unsafe fn create(
        &self,
        target: *const (),
        replacement: *const (),
    ) -> std::result::Result<Box<dyn ArmedHook>, String>;
}

/// Production backend over `retour`'s inline detours.
#[cfg(target_os = "windows")]
#[derive(Debug, Default, Clone, Copy)]
pub struct DetourBackend;

#[cfg(target_os = "windows")]
struct ArmedDetour(retour::RawDetour);

#[cfg(target_os = "windows")]
impl ArmedHook for ArmedDetour {
    fn trampoline(&self) -> *const () {
        self.0.trampoline() as *const ()
    }

    unsafe fn enable(&self) -> std::result::Result<(), String> {
        // SAFETY: forwarded from the engine's single-threaded activation
        // contract.
        unsafe { self.0.enable() }.map_err(|e| e.to_string())
    }
}

#[cfg(target_os = "windows")]
impl HookBackend for DetourBackend {
    unsafe fn create(
        &self,
        target: *const (),
        replacement: *const (),
    ) -> std::result::Result<Box<dyn ArmedHook>, String> {
        // SAFETY: forwarded from the caller's contract on target and
        // replacement.
        let detour =
            unsafe { retour::RawDetour::new(target, replacement) }.map_err(|e| e.to_string())?;
        Ok(Box::new(ArmedDetour(detour)))
    }
}

/// Resolves and arms every registered hook, once, in registration order.
pub struct ActivationEngine<R, B> {
    resolver: R,
    backend: B,
}

impl<R: ModuleResolver, B: HookBackend> ActivationEngine<R, B> {
    pub fn new(resolver: R, backend: B) -> Self {
        Self { resolver, backend }
    }

    /// Activate every descriptor in `registry`, aborting on the first
    /// failure. Hooks enabled before the failure stay enabled; the caller
    /// owns the decision of what to do with the process.
    pub fn activate_all(&self, registry: &mut HookRegistry) -> Result<()> {
        info!("Activating {} hooks", registry.len());

        for descriptor in &mut registry.descriptors {
            self.activate(descriptor)?;
        }

        Ok(())
    }

    fn activate(&self, descriptor: &mut HookDescriptor) -> Result<()> {
        let module = self.resolver.resolve(descriptor.module)?;

        let target = match &descriptor.target {
            TargetSpec::Signature(pattern) => {
                // SAFETY: the resolver vouches that the image is mapped at
                // base for size bytes.
                unsafe { scan::find_in_module(&module, descriptor.name, pattern)? }
            }
            TargetSpec::ImageOffset(offset) => module.base + offset,
        };
        debug!(
            "Resolved \"{}\" -> {} @ {:#x}",
            descriptor.name, descriptor.module, target
        );

        // SAFETY: target is the entry of the signed function and the
        // replacement was declared with a matching ABI by the registrant.
        let armed = unsafe { self.backend.create(target as *const (), descriptor.replacement) }
            .map_err(|message| Error::HookInstallFailed {
                name: descriptor.name.to_string(),
                message,
            })?;

        // SAFETY: activation is single-threaded; nothing else patches this
        // target.
        unsafe { armed.enable() }.map_err(|message| Error::HookEnableFailed {
            name: descriptor.name.to_string(),
            message,
        })?;

        let original = armed.trampoline();

        descriptor.resolved_target = Some(target);
        descriptor.original = Some(original);
        descriptor.armed = Some(armed);
        descriptor.activated = true;

        if let Some(save) = descriptor.save_original {
            save(original);
        }

        info!(
            "Enabled hook \"{}\" -> {} @ {:#x}",
            descriptor.name, descriptor.module, target
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::module::mock::FixedResolver;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Create(usize),
        Enable(usize),
    }

    #[derive(Default, Clone)]
    struct RecordingBackend {
        events: Rc<RefCell<Vec<Event>>>,
    }

    struct RecordedHook {
        target: usize,
        events: Rc<RefCell<Vec<Event>>>,
    }

    impl ArmedHook for RecordedHook {
        fn trampoline(&self) -> *const () {
            // Stand-in trampoline: the target itself, so tests can check
            // what the save callback received.
            self.target as *const ()
        }

        unsafe fn enable(&self) -> std::result::Result<(), String> {
            self.events.borrow_mut().push(Event::Enable(self.target));
            Ok(())
        }
    }

    impl HookBackend for RecordingBackend {
        unsafe fn create(
            &self,
            target: *const (),
            _replacement: *const (),
        ) -> std::result::Result<Box<dyn ArmedHook>, String> {
            self.events
                .borrow_mut()
                .push(Event::Create(target as usize));
            Ok(Box::new(RecordedHook {
                target: target as usize,
                events: Rc::clone(&self.events),
            }))
        }
    }

    struct FailingBackend;

    impl HookBackend for FailingBackend {
        unsafe fn create(
            &self,
            _target: *const (),
            _replacement: *const (),
        ) -> std::result::Result<Box<dyn ArmedHook>, String> {
            Err("prologue too short".to_string())
        }
    }

    struct EnableFailingBackend;

    struct DeadHook;

    impl ArmedHook for DeadHook {
        fn trampoline(&self) -> *const () {
            std::ptr::null()
        }

        unsafe fn enable(&self) -> std::result::Result<(), String> {
            Err("page protection change rejected".to_string())
        }
    }

    impl HookBackend for EnableFailingBackend {
        unsafe fn create(
            &self,
            _target: *const (),
            _replacement: *const (),
        ) -> std::result::Result<Box<dyn ArmedHook>, String> {
            Ok(Box::new(DeadHook))
        }
    }

    fn replacement() -> *const () {
        fn stub() {}
        stub as fn() as *const ()
    }

    fn image_with_prologue_at(offset: usize) -> Vec<u8> {
        let mut image = vec![0u8; 64];
        image[offset] = 0x55;
        image[offset + 1] = 0x8B;
        image[offset + 2] = 0xEC;
        image
    }

    fn prologue() -> BytePattern {
        BytePattern::from_hex("55 8B EC").unwrap()
    }

    #[test]
    fn registry_preserves_registration_order() {
        let mut registry = HookRegistry::new();
        registry.register(HookDescriptor::new(
            "First",
            "a.dll",
            TargetSpec::ImageOffset(0),
            replacement(),
        ));
        registry.register(HookDescriptor::new(
            "Second",
            "a.dll",
            TargetSpec::ImageOffset(4),
            replacement(),
        ));

        let names: Vec<&str> = registry.iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["First", "Second"]);
        assert!(registry.get("Second").is_some());
        assert!(registry.get("Third").is_none());
    }

    #[test]
    fn activation_resolves_and_arms_in_order() {
        static SAVED: AtomicUsize = AtomicUsize::new(0);
        fn save(original: *const ()) {
            SAVED.store(original as usize, Ordering::SeqCst);
        }

        let mut resolver = FixedResolver::default();
        resolver.insert("host_dll.dll", image_with_prologue_at(8));
        let base = resolver.base_of("host_dll.dll");

        let backend = RecordingBackend::default();
        let events = Rc::clone(&backend.events);

        let mut registry = HookRegistry::new();
        registry.register(
            HookDescriptor::new(
                "Prologue",
                "host_dll.dll",
                TargetSpec::Signature(prologue()),
                replacement(),
            )
            .with_save_original(save),
        );
        registry.register(HookDescriptor::new(
            "Fixed",
            "host_dll.dll",
            TargetSpec::ImageOffset(32),
            replacement(),
        ));

        let engine = ActivationEngine::new(resolver, backend);
        engine.activate_all(&mut registry).unwrap();

        // Each hook is created then enabled before the next is touched.
        assert_eq!(
            *events.borrow(),
            vec![
                Event::Create(base + 8),
                Event::Enable(base + 8),
                Event::Create(base + 32),
                Event::Enable(base + 32),
            ]
        );

        let first = registry.get("Prologue").unwrap();
        assert!(first.is_activated());
        assert_eq!(first.resolved_target(), Some(base + 8));
        assert_eq!(first.original(), Some((base + 8) as *const ()));
        assert_eq!(SAVED.load(Ordering::SeqCst), base + 8);

        assert!(registry.get("Fixed").unwrap().is_activated());
    }

    #[test]
    fn missing_module_aborts_before_any_install() {
        let resolver = FixedResolver::default();
        let backend = RecordingBackend::default();
        let events = Rc::clone(&backend.events);

        let mut registry = HookRegistry::new();
        registry.register(HookDescriptor::new(
            "Orphan",
            "missing.dll",
            TargetSpec::Signature(prologue()),
            replacement(),
        ));

        let engine = ActivationEngine::new(resolver, backend);
        let err = engine.activate_all(&mut registry).unwrap_err();

        assert!(matches!(err, Error::ModuleNotFound(_)));
        assert!(events.borrow().is_empty());
        assert!(!registry.get("Orphan").unwrap().is_activated());
    }

    #[test]
    fn unmatched_pattern_aborts_remaining_queue() {
        let mut resolver = FixedResolver::default();
        resolver.insert("host_dll.dll", image_with_prologue_at(0));
        let base = resolver.base_of("host_dll.dll");

        let backend = RecordingBackend::default();
        let events = Rc::clone(&backend.events);

        let mut registry = HookRegistry::new();
        registry.register(HookDescriptor::new(
            "Good",
            "host_dll.dll",
            TargetSpec::Signature(prologue()),
            replacement(),
        ));
        registry.register(HookDescriptor::new(
            "Stale",
            "host_dll.dll",
            TargetSpec::Signature(BytePattern::from_hex("DE AD BE EF").unwrap()),
            replacement(),
        ));
        registry.register(HookDescriptor::new(
            "Untouched",
            "host_dll.dll",
            TargetSpec::ImageOffset(16),
            replacement(),
        ));

        let engine = ActivationEngine::new(resolver, backend);
        let err = engine.activate_all(&mut registry).unwrap_err();

        assert!(matches!(err, Error::PatternNotMatched { .. }));
        // The first hook stays enabled; the third was never reached.
        assert_eq!(
            *events.borrow(),
            vec![Event::Create(base), Event::Enable(base)]
        );
        assert!(registry.get("Good").unwrap().is_activated());
        assert!(!registry.get("Stale").unwrap().is_activated());
        assert!(!registry.get("Untouched").unwrap().is_activated());
    }

    #[test]
    fn enable_failure_leaves_descriptor_unactivated() {
        let mut resolver = FixedResolver::default();
        resolver.insert("host_dll.dll", image_with_prologue_at(0));

        let mut registry = HookRegistry::new();
        registry.register(HookDescriptor::new(
            "Guarded",
            "host_dll.dll",
            TargetSpec::Signature(prologue()),
            replacement(),
        ));

        let engine = ActivationEngine::new(resolver, EnableFailingBackend);
        let err = engine.activate_all(&mut registry).unwrap_err();

        assert!(matches!(err, Error::HookEnableFailed { ref name, .. } if name == "Guarded"));
        let descriptor = registry.get("Guarded").unwrap();
        assert!(!descriptor.is_activated());
        assert!(descriptor.original().is_none());
    }

    #[test]
    fn install_failure_is_labeled_with_descriptor_name() {
        let mut resolver = FixedResolver::default();
        resolver.insert("host_dll.dll", image_with_prologue_at(0));

        let mut registry = HookRegistry::new();
        registry.register(HookDescriptor::new(
            "Tight",
            "host_dll.dll",
            TargetSpec::Signature(prologue()),
            replacement(),
        ));

        let engine = ActivationEngine::new(resolver, FailingBackend);
        let err = engine.activate_all(&mut registry).unwrap_err();

        match err {
            Error::HookInstallFailed { name, message } => {
                assert_eq!(name, "Tight");
                assert_eq!(message, "prologue too short");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
