//! Service/method resolution, including arity and type-shape overload
//! disambiguation (spec.md §4.6, Design Notes §9).
//!
//! The registry itself is an external collaborator per spec.md §1, but
//! its resolution *contract* is specified precisely enough (§4.6, §9,
//! Testable Property 6) that a default in-memory implementation belongs
//! in a complete repo, per SPEC_FULL.md's "Registry" section.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};
use crate::stream::StreamAttachment;

/// A coarse shape for a single argument, used to disambiguate
/// overloads the way spec.md §9 describes: "register each method under
/// a key that incorporates its arity and argument-type shape."
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ArgShape {
    Null,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl ArgShape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ArgShape::Null,
            Value::Bool(_) => ArgShape::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => ArgShape::Integer,
            Value::Number(_) => ArgShape::Float,
            Value::String(_) => ArgShape::String,
            Value::Array(_) => ArgShape::Array,
            Value::Object(_) => ArgShape::Object,
        }
    }

    fn of_args(args: &[Value]) -> Vec<ArgShape> {
        args.iter().map(ArgShape::of).collect()
    }
}

/// The result of invoking a method: a JSON result payload, or a user
/// error (handled separately by the dispatcher as `ServiceInvocation`).
pub type InvokeResult = std::result::Result<Value, String>;

/// One overload of one method: a concrete argument shape (arity
/// implied by its length) plus the function to call. The handler also
/// receives whatever request-direction stream attachments the caller
/// declared (spec.md §3: "Streams may be received in the request
/// direction…"), in declaration order.
pub struct MethodOverload {
    shape: Vec<ArgShape>,
    handler: Box<dyn Fn(&[Value], &[StreamAttachment]) -> InvokeResult + Send + Sync>,
}

impl MethodOverload {
    pub fn new(
        shape: Vec<ArgShape>,
        handler: impl Fn(&[Value], &[StreamAttachment]) -> InvokeResult + Send + Sync + 'static,
    ) -> Self {
        MethodOverload { shape, handler: Box::new(handler) }
    }
}

/// A named collection of methods, each possibly overloaded.
#[derive(Default)]
pub struct Service {
    methods: HashMap<String, Vec<MethodOverload>>,
}

impl Service {
    pub fn new() -> Self {
        Service::default()
    }

    /// Registers one overload of `method_name`. Registration is
    /// additive-only (no unregister), consistent with the teacher's
    /// bootstrap-time peer wiring.
    pub fn method(
        mut self,
        method_name: impl Into<String>,
        shape: Vec<ArgShape>,
        handler: impl Fn(&[Value], &[StreamAttachment]) -> InvokeResult + Send + Sync + 'static,
    ) -> Self {
        self.methods
            .entry(method_name.into())
            .or_default()
            .push(MethodOverload::new(shape, handler));
        self
    }

    /// Resolves and invokes the overload of `method_name` whose shape
    /// matches `arguments` exactly. Multiple equally-good matches (only
    /// possible if a shape is registered twice) yield `AmbiguousMethod`.
    fn resolve<'a>(&'a self, method_name: &str, arguments: &[Value]) -> Result<&'a MethodOverload> {
        let overloads = self
            .methods
            .get(method_name)
            .ok_or_else(|| Error::simple(ErrorKind::ServiceNotFound))?;

        let wanted = ArgShape::of_args(arguments);
        let matches: Vec<&MethodOverload> =
            overloads.iter().filter(|o| o.shape == wanted).collect();

        match matches.len() {
            0 => Err(Error::simple(ErrorKind::ServiceNotFound)),
            1 => Ok(matches[0]),
            _ => {
                let candidates: Vec<String> = overloads
                    .iter()
                    .map(|o| format!("{}({:?})", method_name, o.shape))
                    .collect();
                Err(Error::wrapped(
                    ErrorKind::AmbiguousMethod,
                    format!("Ambiguous call to {}: candidates [{}]", method_name, candidates.join(", ")),
                ))
            }
        }
    }
}

/// `service_name -> Service` map, the default in-memory registry.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Service>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        ServiceRegistry::default()
    }

    pub fn register(&mut self, service_name: impl Into<String>, service: Service) {
        self.services.insert(service_name.into(), service);
    }

    /// Resolves `service_name.method_name(arguments)` to its handler and
    /// invokes it directly (the registry does not own a thread pool;
    /// the dispatcher's own task is the execution context, per spec.md
    /// §4.6's synchronous pseudocode), handing it whatever request
    /// streams the dispatcher already drained off the wire.
    pub fn invoke(
        &self,
        service_name: &str,
        method_name: &str,
        arguments: &[Value],
        request_streams: &[StreamAttachment],
    ) -> Result<InvokeResult> {
        let service = self
            .services
            .get(service_name)
            .ok_or_else(|| Error::simple(ErrorKind::ServiceNotFound))?;
        let overload = service.resolve(method_name, arguments)?;
        Ok((overload.handler)(arguments, request_streams))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calculator() -> Service {
        Service::new()
            .method("hello", vec![], |_, _| Ok(json!("hi")))
            .method("hello", vec![ArgShape::String], |args, _| {
                Ok(json!(format!("hi {}", args[0].as_str().unwrap())))
            })
            .method("add", vec![ArgShape::Integer, ArgShape::Integer], |args, _| {
                let a = args[0].as_i64().unwrap();
                let b = args[1].as_i64().unwrap();
                Ok(json!(a + b))
            })
            .method("add", vec![ArgShape::Float, ArgShape::Float], |args, _| {
                let a = args[0].as_f64().unwrap();
                let b = args[1].as_f64().unwrap();
                Ok(json!(a + b))
            })
    }

    #[test]
    fn resolves_by_arity() {
        let svc = calculator();
        assert_eq!(svc.resolve("hello", &[]).unwrap().shape, Vec::<ArgShape>::new());
        assert_eq!(svc.resolve("hello", &[json!("world")]).unwrap().shape, vec![ArgShape::String]);
    }

    #[test]
    fn resolves_by_type_shape() {
        let svc = calculator();
        let int_overload = svc.resolve("add", &[json!(1), json!(2)]).unwrap();
        assert_eq!(int_overload.shape, vec![ArgShape::Integer, ArgShape::Integer]);
        let float_overload = svc.resolve("add", &[json!(1.5), json!(2.5)]).unwrap();
        assert_eq!(float_overload.shape, vec![ArgShape::Float, ArgShape::Float]);
    }

    #[test]
    fn unmatched_shape_is_service_not_found() {
        let svc = calculator();
        let err = svc.resolve("add", &[json!("a"), json!("b")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceNotFound);
    }

    #[test]
    fn ambiguous_overload_message_contains_ambiguous() {
        let svc = Service::new()
            .method("dup", vec![ArgShape::Integer], |_, _| Ok(json!(1)))
            .method("dup", vec![ArgShape::Integer], |_, _| Ok(json!(2)));
        let err = svc.resolve("dup", &[json!(1)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousMethod);
        assert!(format!("{}", err).contains("Ambiguous"));
    }

    #[test]
    fn registry_invokes_through_service_name() {
        let mut registry = ServiceRegistry::new();
        registry.register("Calculator", calculator());
        let result = registry.invoke("Calculator", "add", &[json!(2), json!(3)], &[]).unwrap();
        assert_eq!(result.unwrap(), json!(5));
    }

    #[test]
    fn unknown_service_is_service_not_found() {
        let registry = ServiceRegistry::new();
        let err = registry.invoke("Nope", "hello", &[], &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceNotFound);
    }

    #[test]
    fn handler_receives_request_stream_attachments() {
        let mut registry = ServiceRegistry::new();
        registry.register(
            "Echo",
            Service::new().method("count_bytes", vec![], |_, streams| {
                Ok(json!(streams.iter().map(StreamAttachment::len).sum::<usize>()))
            }),
        );
        let streams = vec![StreamAttachment::new(1, vec![0u8; 42])];
        let result = registry.invoke("Echo", "count_bytes", &[], &streams).unwrap();
        assert_eq!(result.unwrap(), json!(42));
    }

    #[test]
    fn arities_zero_through_eleven_all_resolve() {
        let mut svc = Service::new();
        for arity in 0..=11usize {
            svc = svc.method("hello", vec![ArgShape::Integer; arity], move |args, _| {
                Ok(json!(args.len()))
            });
        }
        for arity in 0..=11usize {
            let args: Vec<Value> = (0..arity).map(|i| json!(i as i64)).collect();
            let overload = svc.resolve("hello", &args).unwrap();
            assert_eq!(overload.shape.len(), arity);
        }
    }
}
