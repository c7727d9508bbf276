//! Function signatures with a prepared libffi CIF

use super::abi::{classify_return, CallingConvention, ReturnClass};
use crate::config;
use crate::enums::Enums;
use crate::error::{FfiError, Result};
use crate::types::{NativeType, Type, TypeMap, TypeSpec};
use libffi::low::{self, ffi_cif, ffi_type};
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;

/// Options fixed at signature construction
#[derive(Clone)]
pub struct SignatureOptions {
    pub convention: CallingConvention,
    pub enums: Option<Arc<Enums>>,
    pub typedefs: Option<Arc<TypeMap>>,
    /// Run on a helper thread so the caller can be interrupted
    pub blocking: bool,
    /// Capture errno right after the call
    pub save_errno: bool,
}

impl Default for SignatureOptions {
    fn default() -> Self {
        Self {
            convention: CallingConvention::Default,
            enums: None,
            typedefs: None,
            blocking: false,
            save_errno: config::get().calls.save_errno,
        }
    }
}

impl SignatureOptions {
    pub fn convention(mut self, convention: CallingConvention) -> Self {
        self.convention = convention;
        self
    }

    pub fn enums(mut self, enums: Arc<Enums>) -> Self {
        self.enums = Some(enums);
        self
    }

    pub fn typedefs(mut self, typedefs: Arc<TypeMap>) -> Self {
        self.typedefs = Some(typedefs);
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn save_errno(mut self, save_errno: bool) -> Self {
        self.save_errno = save_errno;
        self
    }
}

/// CIF plus the type-pointer array it references
struct PreparedCif {
    cif: Box<UnsafeCell<ffi_cif>>,
    _arg_types: Box<[*mut ffi_type]>,
}

// SAFETY: the CIF is written once by prep_cif and only read afterwards; the
// type records it points at are owned by the enclosing signature
unsafe impl Send for PreparedCif {}
unsafe impl Sync for PreparedCif {}

impl PreparedCif {
    fn prepare(
        convention: CallingConvention,
        ret: &Type,
        params: &[Type],
        fixed: Option<usize>,
    ) -> Result<Self> {
        let mut arg_types: Box<[*mut ffi_type]> = params.iter().map(|p| p.ffi().raw()).collect();
        // SAFETY: ffi_cif is plain data; prep_cif fills it in
        let cif = Box::new(UnsafeCell::new(unsafe { std::mem::zeroed::<ffi_cif>() }));

        // SAFETY: every pointer refers to a type record kept alive by the signature
        unsafe {
            match fixed {
                None => low::prep_cif(
                    cif.get(),
                    convention.ffi_abi(),
                    params.len(),
                    ret.ffi().raw(),
                    arg_types.as_mut_ptr(),
                )?,
                Some(fixed) => low::prep_cif_var(
                    cif.get(),
                    convention.ffi_abi(),
                    fixed,
                    params.len(),
                    ret.ffi().raw(),
                    arg_types.as_mut_ptr(),
                )?,
            }
        }

        Ok(Self {
            cif,
            _arg_types: arg_types,
        })
    }
}

/// Immutable function signature, shared by calls and callback trampolines
///
/// Identity (`id`) is pointer identity and keys the callback caches.
#[derive(Clone)]
pub struct Signature(Arc<SignatureInner>);

struct SignatureInner {
    ret: Type,
    params: Vec<Type>,
    fixed: Option<usize>,
    options: SignatureOptions,
    callback_param: Option<usize>,
    cif: PreparedCif,
}

impl Signature {
    pub fn new<R, I>(ret: R, params: I, options: SignatureOptions) -> Result<Self>
    where
        R: Into<TypeSpec>,
        I: IntoIterator,
        I::Item: Into<TypeSpec>,
    {
        let typedefs = options.typedefs.clone();
        let ret = ret.into().resolve(typedefs.as_deref())?;
        let params = params
            .into_iter()
            .map(|p| p.into().resolve(typedefs.as_deref()))
            .collect::<Result<Vec<_>>>()?;
        Self::from_types(ret, params, None, options)
    }

    pub(crate) fn from_types(
        ret: Type,
        params: Vec<Type>,
        fixed: Option<usize>,
        options: SignatureOptions,
    ) -> Result<Self> {
        validate_return(&ret)?;
        for (i, param) in params.iter().enumerate() {
            validate_param(i, param)?;
        }

        let mut callbacks = params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind() == NativeType::Callback)
            .map(|(i, _)| i);
        let callback_param = match (callbacks.next(), callbacks.next()) {
            (Some(i), None) => Some(i),
            _ => None,
        };

        let cif = PreparedCif::prepare(options.convention, &ret, &params, fixed)?;
        Ok(Self(Arc::new(SignatureInner {
            ret,
            params,
            fixed,
            options,
            callback_param,
            cif,
        })))
    }

    #[inline]
    pub fn return_type(&self) -> &Type {
        &self.0.ret
    }

    #[inline]
    pub fn params(&self) -> &[Type] {
        &self.0.params
    }

    #[inline]
    pub fn param_count(&self) -> usize {
        self.0.params.len()
    }

    #[inline]
    pub fn convention(&self) -> CallingConvention {
        self.0.options.convention
    }

    pub fn enums(&self) -> Option<&Enums> {
        self.0.options.enums.as_deref()
    }

    #[inline]
    pub fn is_blocking(&self) -> bool {
        self.0.options.blocking
    }

    #[inline]
    pub fn saves_errno(&self) -> bool {
        self.0.options.save_errno
    }

    pub fn is_variadic(&self) -> bool {
        self.0.fixed.is_some()
    }

    /// Index of the parameter an ambient block may stand in for
    #[inline]
    pub fn callback_param(&self) -> Option<usize> {
        self.0.callback_param
    }

    /// Pointer identity
    #[inline]
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn return_class(&self) -> ReturnClass {
        classify_return(&self.0.ret)
    }

    /// Function-pointer type with this signature
    pub fn to_type(&self) -> Type {
        Type::callback(self.clone())
    }

    #[inline]
    pub(crate) fn cif(&self) -> *mut ffi_cif {
        self.0.cif.cif.get()
    }

    pub(crate) fn options(&self) -> &SignatureOptions {
        &self.0.options
    }
}

/// Build a signature; types may be descriptors or registry names
pub fn make_signature<R, I>(ret: R, params: I, options: SignatureOptions) -> Result<Signature>
where
    R: Into<TypeSpec>,
    I: IntoIterator,
    I::Item: Into<TypeSpec>,
{
    Signature::new(ret, params, options)
}

fn validate_return(ret: &Type) -> Result<()> {
    match ret.kind() {
        NativeType::Varargs => Err(FfiError::argument("varargs is not a valid return type")),
        NativeType::Array | NativeType::CharArray => Err(FfiError::argument(
            "arrays cannot be returned by value",
        )),
        _ => Ok(()),
    }
}

fn validate_param(index: usize, param: &Type) -> Result<()> {
    match param.kind() {
        NativeType::Void => Err(FfiError::argument(format!(
            "parameter {} has type void",
            index
        ))),
        NativeType::Varargs => Err(FfiError::argument(format!(
            "parameter {} is varargs; use VariadicInvoker",
            index
        ))),
        NativeType::Array | NativeType::CharArray => Err(FfiError::argument(format!(
            "parameter {} is an array; pass a pointer instead",
            index
        ))),
        _ => Ok(()),
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.0.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p.kind())?;
        }
        if self.is_variadic() {
            write!(f, ", ...")?;
        }
        write!(f, ") -> {}", self.0.ret.kind())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature{}", self)
    }
}
