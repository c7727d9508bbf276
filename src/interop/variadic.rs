//! Calls to C variadic functions

use super::call::execute;
use super::frame::ArgFrame;
use super::marshal::checked_int;
use super::signature::{Signature, SignatureOptions};
use crate::error::{FfiError, Result};
use crate::types::{builtin, NativeType, Type, TypeSpec};
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A variadic function with its fixed parameters
///
/// Each call supplies the extra arguments with their types, so the CIF is
/// prepared per call. CIFs whose extra types are all builtin are cached.
pub struct VariadicInvoker {
    address: usize,
    ret: Type,
    fixed: Vec<Type>,
    options: SignatureOptions,
    prepared: Mutex<HashMap<Vec<NativeType>, Signature>>,
}

impl VariadicInvoker {
    /// `params` are the fixed parameters, optionally ending in `varargs`
    pub fn new<R, I>(address: usize, ret: R, params: I, options: SignatureOptions) -> Result<Self>
    where
        R: Into<TypeSpec>,
        I: IntoIterator,
        I::Item: Into<TypeSpec>,
    {
        if address == 0 {
            return Err(FfiError::NullPointer {
                context: Some("variadic function address".into()),
            });
        }
        let typedefs = options.typedefs.clone();
        let ret = ret.into().resolve(typedefs.as_deref())?;
        let mut fixed = params
            .into_iter()
            .map(|p| p.into().resolve(typedefs.as_deref()))
            .collect::<Result<Vec<_>>>()?;

        if fixed.last().map(Type::kind) == Some(NativeType::Varargs) {
            fixed.pop();
        }
        if fixed.iter().any(|t| t.kind() == NativeType::Varargs) {
            return Err(FfiError::argument("varargs must be the last parameter"));
        }

        Ok(Self {
            address,
            ret,
            fixed,
            options,
            prepared: Mutex::new(HashMap::new()),
        })
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.address
    }

    pub fn fixed_count(&self) -> usize {
        self.fixed.len()
    }

    /// Call with `fixed_args` for the fixed parameters and typed extras
    pub fn call(&self, fixed_args: &[Value], varargs: &[(TypeSpec, Value)]) -> Result<Value> {
        if fixed_args.len() != self.fixed.len() {
            return Err(FfiError::arity(fixed_args.len(), self.fixed.len()));
        }

        let typedefs = self.options.typedefs.as_deref();
        let mut extra = Vec::with_capacity(varargs.len());
        for (spec, value) in varargs {
            let declared = spec.clone().resolve(typedefs)?;
            if declared.kind().is_integer() && matches!(value, Value::Int(_)) {
                checked_int(value, declared.kind())?;
            }
            extra.push(promote(declared)?);
        }

        let signature = self.signature_for(&extra)?;
        let args = fixed_args.iter().chain(varargs.iter().map(|(_, v)| v));
        let mut frame = ArgFrame::build_typed(&signature, signature.params().iter().zip(args))?;
        execute(&signature, self.address, &mut frame, None)
    }

    fn signature_for(&self, extra: &[Type]) -> Result<Signature> {
        let key: Option<Vec<NativeType>> = extra
            .iter()
            .map(|t| t.kind().is_builtin().then(|| t.kind()))
            .collect();

        if let Some(key) = &key {
            if let Some(signature) = self.prepared.lock().get(key) {
                return Ok(signature.clone());
            }
        }

        let params = self.fixed.iter().chain(extra).cloned().collect();
        let signature = Signature::from_types(
            self.ret.clone(),
            params,
            Some(self.fixed.len()),
            self.options.clone(),
        )?;
        if let Some(key) = key {
            self.prepared.lock().insert(key, signature.clone());
        }
        Ok(signature)
    }
}

/// C default argument promotions
fn promote(ty: Type) -> Result<Type> {
    let promoted = match ty.kind() {
        NativeType::Float32 => NativeType::Float64,
        NativeType::Int8 | NativeType::UInt8 | NativeType::Int16 | NativeType::UInt16 => {
            NativeType::Int32
        }
        _ => return Ok(ty),
    };
    builtin(promoted).ok_or_else(|| FfiError::runtime("missing builtin type"))
}
