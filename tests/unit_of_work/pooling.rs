//! Context identity, type matching, resolution and timeouts

use crate::*;
use proptest::prelude::*;
use std::time::Duration;
use unitwork::{
    ContextTypeId, PersistenceContext, ResolveArgs, ResolveValue, UowError, UowResult,
};

#[test]
fn test_same_request_same_context() {
    let backend = MemoryBackend::new();
    let mut scope = begun(&backend, UnitOfWorkOptions::non_transactional());

    let first = scope.context::<Blogs>().unwrap();
    let second = scope.context::<Blogs>().unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(scope.context_count(), 1);
    assert_eq!(backend.journal().created(), vec![BLOGS]);
    scope.dispose().unwrap();
}

#[test]
fn test_abstract_request_shares_concrete_context() {
    let backend = MemoryBackend::new();
    let mut scope = begun(&backend, UnitOfWorkOptions::non_transactional());

    let by_trait = scope.context::<dyn BlogStore>().unwrap();
    let concrete = scope.context::<Blogs>().unwrap();
    assert!(by_trait.ptr_eq(&concrete));
    assert_eq!(by_trait.key().concrete_type, ContextTypeId::of::<Blogs>());
    scope.dispose().unwrap();
}

#[test]
fn test_contexts_for_separate_scopes_are_distinct() {
    let backend = MemoryBackend::new();
    let mut a = begun(&backend, UnitOfWorkOptions::non_transactional());
    let mut b = begun(&backend, UnitOfWorkOptions::non_transactional());
    assert!(!a
        .context::<Blogs>()
        .unwrap()
        .ptr_eq(&b.context::<Blogs>().unwrap()));
    a.dispose().unwrap();
    assert_eq!(backend.journal().releases().len(), 1);
    b.dispose().unwrap();
}

#[test]
fn test_resolver_arguments_split_contexts() {
    struct Tenants;

    let backend = MemoryBackend::new();
    let resolver = |args: &ResolveArgs| -> UowResult<String> {
        match args.get("tenant") {
            Some(ResolveValue::Text(tenant)) => Ok(format!("Data Source=tenant_{}", tenant)),
            _ => Err(UowError::configuration("tenant argument missing")),
        }
    };
    let services = UnitOfWorkServices::builder(Arc::new(backend.clone()))
        .resolver(resolver)
        .build();
    let mut scope = UnitOfWorkScope::new(services);
    scope.begin(UnitOfWorkOptions::non_transactional()).unwrap();

    let args = |tenant: &str| {
        let mut args = ResolveArgs::new();
        args.insert("tenant", ResolveValue::Text(tenant.to_string()));
        args
    };
    let ty = ContextTypeId::of::<Tenants>();
    let acme = scope.context_for(ty, args("acme")).unwrap();
    let globex = scope.context_for(ty, args("globex")).unwrap();
    let acme_again = scope.context_for(ty, args("acme")).unwrap();

    assert!(!acme.ptr_eq(&globex));
    assert!(acme.ptr_eq(&acme_again));
    assert_eq!(acme.key().connection_string, "Data Source=tenant_acme");
    assert!(matches!(
        scope.context::<Tenants>(),
        Err(UowError::Configuration(_))
    ));
    scope.dispose().unwrap();
}

#[test]
fn test_timeout_first_write_wins() {
    let backend = MemoryBackend::new();
    let mut scope = begun(
        &backend,
        UnitOfWorkOptions::transactional().with_timeout(Duration::from_secs(30)),
    );

    let blogs = scope.context::<Blogs>().unwrap();
    let orders = scope.context::<Orders>().unwrap();
    let timeout = |h: &ContextHandle| h.with(|ctx: &mut MemoryContext| ctx.command_timeout()).unwrap();

    assert_eq!(timeout(&blogs), Some(Duration::from_secs(30)));
    assert_eq!(timeout(&orders), Some(Duration::from_secs(10)));
    scope.dispose().unwrap();
}

#[test]
fn test_lazy_load_follows_options() {
    let backend = MemoryBackend::new();
    let mut scope = begun(
        &backend,
        UnitOfWorkOptions::non_transactional().with_lazy_load(true),
    );
    let lazy = scope
        .context::<Blogs>()
        .unwrap()
        .with(|ctx: &mut MemoryContext| ctx.is_lazy_loading_enabled())
        .unwrap();
    assert!(lazy);
    scope.dispose().unwrap();
}

#[test]
fn test_ambiguous_type_registration() {
    trait Store {}
    let backend = MemoryBackend::new();
    let services = UnitOfWorkServices::builder(Arc::new(backend.clone()))
        .resolver(DefaultConnectionStringResolver::new().with_default("Data Source=main"))
        .type_matcher(
            RegisteredTypeMatcher::new()
                .register::<dyn Store, Blogs>()
                .register::<dyn Store, Orders>(),
        )
        .build();
    let mut scope = UnitOfWorkScope::new(services);
    scope.begin(UnitOfWorkOptions::non_transactional()).unwrap();
    assert!(matches!(
        scope.context::<dyn Store>(),
        Err(UowError::Configuration(_))
    ));
    assert!(scope.context::<Blogs>().is_ok());
    scope.dispose().unwrap();
}

proptest! {
    #[test]
    fn prop_scope_pool_identity(requests in proptest::collection::vec(0u8..3, 1..20)) {
        let backend = MemoryBackend::new();
        let mut scope = begun(&backend, UnitOfWorkOptions::transactional());
        let mut first_seen: Vec<(u8, ContextHandle)> = Vec::new();

        for request in requests {
            let handle = match request {
                0 => scope.context::<Blogs>().unwrap(),
                1 => scope.context::<dyn BlogStore>().unwrap(),
                _ => scope.context::<Orders>().unwrap(),
            };
            // Blogs and dyn BlogStore share one key.
            let slot = if request == 2 { 2 } else { 0 };
            match first_seen.iter().find(|(s, _)| *s == slot) {
                Some((_, earlier)) => prop_assert!(earlier.ptr_eq(&handle)),
                None => first_seen.push((slot, handle)),
            }
        }

        prop_assert_eq!(scope.context_count(), first_seen.len());
        prop_assert_eq!(backend.journal().enlisted().len(), first_seen.len());
        scope.dispose().unwrap();
    }
}
