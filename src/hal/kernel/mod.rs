//! Kernel source generation.
//!
//! A kernel is a pure function of its [`KernelKey`]: the operation, the element type and
//! the vector width. Sources are WGSL, rendered from the templates in [`shader`] and
//! checked with naga before they reach the device.

use derive_more::Display;
use thiserror::Error;

use crate::loom::num::DataType;

pub mod shader;
pub mod template;

use template::{Bindings, TemplateError, render};

/// Invocations per workgroup of one-dimensional kernels.
pub const BLOCK: u32 = 64;
/// Workgroup edge of the tiled contraction.
pub const TILE: u32 = 16;
/// Workgroup edge of the untiled contraction.
pub const SMALL_TILE: u32 = 8;
/// Contractions with every dimension below this take the untiled kernel.
pub const SMALL_LIMIT: usize = 64;
/// Highest rank the relayout kernel can walk.
pub const MAX_RANK: usize = 8;

/// Operations with a device kernel.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Method {
    #[display("positive")]
    Positive,
    #[display("negative")]
    Negative,
    #[display("scalar_add")]
    ScalarAdd,
    #[display("scalar_mult")]
    ScalarMult,
    #[display("scalar_div")]
    ScalarDiv,
    #[display("tensor_add")]
    TensorAdd,
    #[display("hadamard_mult")]
    TensorHadamard,
    #[display("tensor_mult")]
    TensorMult,
    #[display("tensor_mult_small")]
    TensorMultSmall,
    #[display("func")]
    Activate,
    #[display("relayout")]
    Relayout,
}

impl Method {
    pub const ALL: [Method; 11] = [
        Method::Positive,
        Method::Negative,
        Method::ScalarAdd,
        Method::ScalarMult,
        Method::ScalarDiv,
        Method::TensorAdd,
        Method::TensorHadamard,
        Method::TensorMult,
        Method::TensorMultSmall,
        Method::Activate,
        Method::Relayout,
    ];

    /// Name of the kernel's entry point.
    pub const fn entry(self) -> &'static str {
        match self {
            Method::Positive => "positive",
            Method::Negative => "negative",
            Method::ScalarAdd | Method::TensorAdd => "add",
            Method::ScalarMult | Method::TensorMult | Method::TensorMultSmall => "mult",
            Method::ScalarDiv => "div",
            Method::TensorHadamard => "hadamard_mult",
            Method::Activate => "func",
            Method::Relayout => "relayout",
        }
    }

    /// Returns `true` if the method is defined on the element type.
    pub const fn supports(self, data_type: DataType) -> bool {
        match self {
            Method::Negative => data_type.is_signed(),
            Method::Activate => data_type.is_float(),
            _ => true,
        }
    }
}

/// Number of elements one invocation of an element-wise kernel handles.
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VectorWidth {
    #[display("1")]
    W1 = 1,
    #[display("2")]
    W2 = 2,
    #[default]
    #[display("4")]
    W4 = 4,
    #[display("8")]
    W8 = 8,
    #[display("16")]
    W16 = 16,
}

impl VectorWidth {
    pub const ALL: [VectorWidth; 5] = [
        VectorWidth::W1,
        VectorWidth::W2,
        VectorWidth::W4,
        VectorWidth::W8,
        VectorWidth::W16,
    ];

    #[inline]
    pub const fn get(self) -> u32 {
        self as u32
    }

    /// Components of the widest WGSL vector used, at most 4.
    #[inline]
    pub const fn lanes(self) -> u32 {
        match self {
            VectorWidth::W1 => 1,
            VectorWidth::W2 => 2,
            _ => 4,
        }
    }

    /// Vectors of [`lanes`](Self::lanes) per invocation.
    #[inline]
    pub const fn chunks(self) -> u32 {
        self.get() / self.lanes()
    }
}

/// Identity of a generated kernel, and the key of the compiled-kernel cache.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("{method}<{data_type}, {width}>")]
pub struct KernelKey {
    pub method: Method,
    pub data_type: DataType,
    pub width: VectorWidth,
}

impl KernelKey {
    pub fn new(method: Method, data_type: DataType, width: VectorWidth) -> Self {
        Self {
            method,
            data_type,
            width,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("kernel {0} is not defined for its element type")]
    Unsupported(KernelKey),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("failed to compile kernel {key}:\n{log}")]
    Compile { key: KernelKey, log: String },
}

/// Generated WGSL source of one kernel.
#[derive(Debug, Clone)]
pub struct KernelSource {
    pub key: KernelKey,
    pub source: String,
}

impl KernelSource {
    #[inline]
    pub fn entry(&self) -> &'static str {
        self.key.method.entry()
    }

    /// Parses and validates the source, returning the compiler log on failure.
    pub fn compile(&self) -> Result<naga::Module, KernelError> {
        let key = self.key;
        let module = naga::front::wgsl::parse_str(&self.source).map_err(|err| {
            let log = err.emit_to_string(&self.source);
            KernelError::Compile { key, log }
        })?;

        let flags = naga::valid::ValidationFlags::all();
        let capabilities = naga::valid::Capabilities::all();
        naga::valid::Validator::new(flags, capabilities)
            .validate(&module)
            .map_err(|err| {
                let log = err.emit_to_string(&self.source);
                KernelError::Compile { key, log }
            })?;
        Ok(module)
    }
}

/// Renders the source of a kernel.
pub fn generate(key: KernelKey) -> Result<KernelSource, KernelError> {
    let KernelKey {
        method,
        data_type,
        width,
    } = key;
    if !method.supports(data_type) {
        return Err(KernelError::Unsupported(key));
    }

    let ty = data_type.wgsl();
    let bindings = Bindings::new()
        .bind("enable", data_type.enable())
        .bind("type", ty)
        .bind("zero", data_type.zero())
        .bind("one", data_type.one())
        .bind("entry", method.entry())
        .bind("block", BLOCK);

    // contractions of floats can fuse an activation into the store
    let (helpers, epilogue) = match data_type.is_float() {
        true => (render(shader::ACTIVATE, &bindings)?, "y = activate(y);"),
        false => (String::new(), ""),
    };

    let source = match method {
        Method::TensorMult => {
            let lanes = width.lanes();
            let bindings = bindings
                .bind("params", shader::MATMUL_PARAMS)
                .bind("helpers", helpers)
                .bind("epilogue", epilogue)
                .bind("tile", TILE)
                .bind("tile_columns", TILE * lanes)
                .bind("lanes", lanes);
            render(shader::MATMUL_TILED, &bindings)?
        }
        Method::TensorMultSmall => {
            let bindings = bindings
                .bind("params", shader::MATMUL_PARAMS)
                .bind("helpers", helpers)
                .bind("epilogue", epilogue)
                .bind("tile", SMALL_TILE);
            render(shader::MATMUL_SMALL, &bindings)?
        }
        Method::Relayout => {
            let bindings = bindings.bind("max_rank", MAX_RANK);
            render(shader::RELAYOUT, &bindings)?
        }
        _ => {
            let bindings = elementwise(method, data_type, width, bindings)?;
            render(shader::ELEMENTWISE, &bindings)?
        }
    };

    #[cfg(feature = "trace")]
    tracing::trace!(%key, "generated kernel");
    Ok(KernelSource { key, source })
}

fn elementwise(
    method: Method,
    data_type: DataType,
    width: VectorWidth,
    bindings: Bindings,
) -> Result<Bindings, KernelError> {
    let ty = data_type.wgsl();
    let lanes = width.lanes();

    let storage = |binding: u32, name: &str, access: &str, ty: &str| {
        format!("@group(0) @binding({binding}) var<storage, {access}> {name}: {ty};")
    };
    let params = |binding: u32| storage(binding, "params", "read", "Params");
    let len = "    len: u32,".to_string();

    // (params fields, extra bindings, helper functions, vector body, scalar body)
    let (fields, extra, helpers, vector, scalar) = match method {
        Method::Positive => (len, params(1), "", "let y = x;".into(), "let y = x;".into()),
        Method::Negative => (len, params(1), "", "let y = -x;".into(), "let y = -x;".into()),
        Method::ScalarAdd | Method::ScalarMult | Method::ScalarDiv => {
            let op = match method {
                Method::ScalarAdd => "+",
                Method::ScalarMult => "*",
                _ => "/",
            };
            let fields = format!("{len}\n    scalar: {ty},");
            let body = format!("let y = x {op} params.scalar;");
            (fields, params(1), "", body.clone(), body)
        }
        Method::TensorAdd | Method::TensorHadamard => {
            let op = match method {
                Method::TensorAdd => "+",
                _ => "*",
            };
            let b = storage(1, "b", "read", &format!("array<{ty}>"));
            let extra = format!("{b}\n{}", params(2));
            let vector = format!(
                "let z = {};\n            let y = x {op} z;",
                shader::load("b", data_type, lanes)
            );
            let scalar = format!("let z = b[o];\n                let y = x {op} z;");
            (len, extra, "", vector, scalar)
        }
        Method::Activate => {
            let fields =
                format!("{len}\n    kind: u32,\n    derivative: u32,\n    alpha: f32,");
            let vector = format!("let y = {};", shader::map("activate", "x", data_type, lanes));
            let scalar = "let y = activate(x);".to_string();
            (fields, params(1), shader::ACTIVATE, vector, scalar)
        }
        Method::TensorMult | Method::TensorMultSmall | Method::Relayout => {
            unreachable!("{method} is not element-wise")
        }
    };
    let helpers = render(helpers, &bindings)?;

    Ok(bindings
        .bind("params", fields)
        .bind("bindings", extra)
        .bind("helpers", helpers)
        .bind("width", width.get())
        .bind("lanes", lanes)
        .bind("chunks", width.chunks())
        .bind("load", shader::load("a", data_type, lanes))
        .bind("store", shader::store("a", "y", lanes))
        .bind("vector", vector)
        .bind("scalar", scalar))
}
