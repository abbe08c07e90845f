use half::f16;
use naga::Scalar;

use crate::loom::num::DataType;

/// The type can be convert to an IR node in the shader.
pub trait ShaderType<T> {
    /// Converts this type into its shader IR.
    fn to_shader_ir() -> T;
}

macro_rules! impl_scalar {
    ($type:ty, $scalar:expr) => {
        impl ShaderType<Scalar> for $type {
            fn to_shader_ir() -> Scalar {
                $scalar
            }
        }
    };
}

impl_scalar!(f16, Scalar::F16);
impl_scalar!(f32, Scalar::F32);
impl_scalar!(u32, Scalar::U32);
impl_scalar!(i32, Scalar::I32);

impl DataType {
    /// Scalar type in the shader IR.
    pub fn shader_ir(self) -> Scalar {
        match self {
            DataType::F32 => f32::to_shader_ir(),
            DataType::F16 => f16::to_shader_ir(),
            DataType::I32 => i32::to_shader_ir(),
            DataType::U32 => u32::to_shader_ir(),
        }
    }

    /// Name of the type in WGSL.
    pub const fn wgsl(self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::I32 => "i32",
            DataType::U32 => "u32",
        }
    }

    /// Typed WGSL literal of zero.
    pub const fn zero(self) -> &'static str {
        match self {
            DataType::F32 => "0.0f",
            DataType::F16 => "0.0h",
            DataType::I32 => "0i",
            DataType::U32 => "0u",
        }
    }

    /// Typed WGSL literal of one.
    pub const fn one(self) -> &'static str {
        match self {
            DataType::F32 => "1.0f",
            DataType::F16 => "1.0h",
            DataType::I32 => "1i",
            DataType::U32 => "1u",
        }
    }

    /// Extension directive the type needs in WGSL, if any.
    pub const fn enable(self) -> &'static str {
        match self {
            DataType::F16 => "enable f16;",
            _ => "",
        }
    }
}

const COMPONENTS: [&str; 4] = ["x", "y", "z", "w"];

/// The WGSL type holding `lanes` elements.
pub fn vector_type(data_type: DataType, lanes: u32) -> String {
    match lanes {
        1 => data_type.wgsl().to_string(),
        lanes => format!("vec{lanes}<{}>", data_type.wgsl()),
    }
}

/// Loads `lanes` consecutive elements of `array` starting at `o`.
pub fn load(array: &str, data_type: DataType, lanes: u32) -> String {
    match lanes {
        1 => format!("{array}[o]"),
        lanes => {
            let elements = (0..lanes)
                .map(|lane| match lane {
                    0 => format!("{array}[o]"),
                    lane => format!("{array}[o + {lane}u]"),
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}({elements})", vector_type(data_type, lanes))
        }
    }
}

/// Stores the `lanes` components of `value` to `array` starting at `o`.
pub fn store(array: &str, value: &str, lanes: u32) -> String {
    match lanes {
        1 => format!("{array}[o] = {value};"),
        lanes => (0..lanes as usize)
            .map(|lane| match lane {
                0 => format!("{array}[o] = {value}.x;"),
                lane => format!("{array}[o + {lane}u] = {value}.{};", COMPONENTS[lane]),
            })
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Applies the scalar function `f` to every component of `value`.
pub fn map(f: &str, value: &str, data_type: DataType, lanes: u32) -> String {
    match lanes {
        1 => format!("{f}({value})"),
        lanes => {
            let components = COMPONENTS[..lanes as usize]
                .iter()
                .map(|c| format!("{f}({value}.{c})"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}({components})", vector_type(data_type, lanes))
        }
    }
}

/// In-place element-wise kernel over `a`, `{{width}}` elements per invocation.
///
/// The vector body runs in `{{chunks}}` chunks of `{{lanes}}` while the whole run fits;
/// the last partial run takes the bounded scalar loop.
pub const ELEMENTWISE: &str = r#"{{enable}}
struct Params {
{{params}}
}

@group(0) @binding(0) var<storage, read_write> a: array<{{type}}>;
{{bindings}}
{{helpers}}
@compute @workgroup_size({{block}}, 1, 1)
fn {{entry}}(
    @builtin(global_invocation_id) invocation: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let index = invocation.x + invocation.y * groups.x * {{block}}u;
    let base = index * {{width}}u;
    if base >= params.len {
        return;
    }
    if base + {{width}}u <= params.len {
        for (var c = 0u; c < {{chunks}}u; c += 1u) {
            let o = base + c * {{lanes}}u;
            let x = {{load}};
            {{vector}}
            {{store}}
        }
    } else {
        for (var i = 0u; i < {{width}}u; i += 1u) {
            let o = base + i;
            if o < params.len {
                let x = a[o];
                {{scalar}}
                a[o] = y;
            }
        }
    }
}
"#;

/// Point-wise activation selected by `params.kind`; `params.derivative` picks the gradient.
pub const ACTIVATE: &str = r#"fn activate(x: {{type}}) -> {{type}} {
    let derivative = params.derivative != 0u;
    let alpha = {{type}}(params.alpha);
    let positive = x > {{zero}};
    var y = x;
    switch params.kind {
        case 1u: {
            let s = {{one}} / ({{one}} + exp(-x));
            y = select(s, s * ({{one}} - s), derivative);
        }
        case 2u: {
            let t = tanh(x);
            y = select(t, {{one}} - t * t, derivative);
        }
        case 3u: {
            y = select(max(x, {{zero}}), select({{zero}}, {{one}}, positive), derivative);
        }
        case 4u: {
            y = select(select(alpha * x, x, positive), select(alpha, {{one}}, positive), derivative);
        }
        case 5u: {
            let e = exp(x);
            y = select(select(alpha * (e - {{one}}), x, positive), select(alpha * e, {{one}}, positive), derivative);
        }
        case 6u: {
            y = select(x * x, x + x, derivative);
        }
        case 7u: {
            let scale = {{type}}(0.7978846);
            let cubic = {{type}}(0.044715);
            let mid = {{type}}(0.5);
            let t = tanh(scale * (x + cubic * x * x * x));
            let dt = ({{one}} - t * t) * scale * ({{one}} + {{type}}(3.0) * cubic * x * x);
            y = select(mid * x * ({{one}} + t), mid * ({{one}} + t) + mid * x * dt, derivative);
        }
        default: {
            y = select(x, {{one}}, derivative);
        }
    }
    return y;
}
"#;

pub const MATMUL_PARAMS: &str = r#"struct Params {
    m: u32,
    n: u32,
    k: u32,
    a_row: u32,
    a_col: u32,
    b_row: u32,
    b_col: u32,
    bias: u32,
    kind: u32,
    derivative: u32,
    alpha: f32,
    pad: u32,
}"#;

/// Untiled contraction, one invocation per output element.
///
/// Both contraction kernels add `bias[col]` when `params.bias` is set and run `{{epilogue}}`
/// on the sum before the store.
pub const MATMUL_SMALL: &str = r#"{{enable}}
{{params}}

@group(0) @binding(0) var<storage, read> a: array<{{type}}>;
@group(0) @binding(1) var<storage, read> b: array<{{type}}>;
@group(0) @binding(2) var<storage, read_write> c: array<{{type}}>;
@group(0) @binding(3) var<storage, read> bias: array<{{type}}>;
@group(0) @binding(4) var<uniform> params: Params;
{{helpers}}
@compute @workgroup_size({{tile}}, {{tile}}, 1)
fn {{entry}}(@builtin(global_invocation_id) invocation: vec3<u32>) {
    let row = invocation.y;
    let col = invocation.x;
    if row >= params.m || col >= params.n {
        return;
    }
    var sum = {{zero}};
    for (var k = 0u; k < params.k; k += 1u) {
        sum = sum + a[row * params.a_row + k * params.a_col] * b[k * params.b_row + col * params.b_col];
    }
    var y = sum;
    if params.bias != 0u {
        y = y + bias[col];
    }
    {{epilogue}}
    c[row * params.n + col] = y;
}
"#;

/// Tiled contraction. A `{{tile}}`x`{{tile}}` workgroup computes a block of `{{tile}}` rows
/// by `{{tile}} * {{lanes}}` columns, each invocation accumulating `{{lanes}}` columns.
pub const MATMUL_TILED: &str = r#"{{enable}}
{{params}}

const TILE: u32 = {{tile}}u;
const LANES: u32 = {{lanes}}u;

@group(0) @binding(0) var<storage, read> a: array<{{type}}>;
@group(0) @binding(1) var<storage, read> b: array<{{type}}>;
@group(0) @binding(2) var<storage, read_write> c: array<{{type}}>;
@group(0) @binding(3) var<storage, read> bias: array<{{type}}>;
@group(0) @binding(4) var<uniform> params: Params;
{{helpers}}
var<workgroup> tile_a: array<array<{{type}}, {{tile}}>, {{tile}}>;
var<workgroup> tile_b: array<array<{{type}}, {{tile_columns}}>, {{tile}}>;

@compute @workgroup_size({{tile}}, {{tile}}, 1)
fn {{entry}}(
    @builtin(local_invocation_id) local: vec3<u32>,
    @builtin(workgroup_id) group: vec3<u32>,
) {
    let row = group.y * TILE + local.y;
    let col = (group.x * TILE + local.x) * LANES;
    var acc: array<{{type}}, {{lanes}}>;

    let tiles = (params.k + TILE - 1u) / TILE;
    for (var t = 0u; t < tiles; t += 1u) {
        let ka = t * TILE + local.x;
        if row < params.m && ka < params.k {
            tile_a[local.y][local.x] = a[row * params.a_row + ka * params.a_col];
        } else {
            tile_a[local.y][local.x] = {{zero}};
        }
        let kb = t * TILE + local.y;
        for (var l = 0u; l < LANES; l += 1u) {
            let j = col + l;
            if kb < params.k && j < params.n {
                tile_b[local.y][local.x * LANES + l] = b[kb * params.b_row + j * params.b_col];
            } else {
                tile_b[local.y][local.x * LANES + l] = {{zero}};
            }
        }
        workgroupBarrier();

        for (var kk = 0u; kk < TILE; kk += 1u) {
            let x = tile_a[local.y][kk];
            for (var l = 0u; l < LANES; l += 1u) {
                acc[l] = acc[l] + x * tile_b[kk][local.x * LANES + l];
            }
        }
        workgroupBarrier();
    }

    if row < params.m {
        for (var l = 0u; l < LANES; l += 1u) {
            let j = col + l;
            if j < params.n {
                var y = acc[l];
                if params.bias != 0u {
                    y = y + bias[j];
                }
                {{epilogue}}
                c[row * params.n + j] = y;
            }
        }
    }
}
"#;

/// Strided gather of `a` into the contiguous `b`, walking the logical index odometer.
pub const RELAYOUT: &str = r#"{{enable}}
struct Params {
    len: u32,
    rank: u32,
    shape: array<u32, {{max_rank}}>,
    strides: array<u32, {{max_rank}}>,
}

@group(0) @binding(0) var<storage, read> a: array<{{type}}>;
@group(0) @binding(1) var<storage, read_write> b: array<{{type}}>;
@group(0) @binding(2) var<storage, read> params: Params;

@compute @workgroup_size({{block}}, 1, 1)
fn {{entry}}(
    @builtin(global_invocation_id) invocation: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let index = invocation.x + invocation.y * groups.x * {{block}}u;
    if index >= params.len {
        return;
    }
    var rest = index;
    var offset = 0u;
    for (var d = params.rank; d > 0u; d -= 1u) {
        let axis = d - 1u;
        let extent = params.shape[axis];
        offset += (rest % extent) * params.strides[axis];
        rest = rest / extent;
    }
    b[index] = a[offset];
}
"#;

#[cfg(test)]
mod tests {
    use crate::loom::num::DataType;

    use super::{load, map, store, vector_type};

    #[test]
    fn test_snippets() {
        assert_eq!(vector_type(DataType::F16, 1), "f16");
        assert_eq!(vector_type(DataType::I32, 2), "vec2<i32>");
        assert_eq!(load("a", DataType::F32, 1), "a[o]");
        assert_eq!(
            load("b", DataType::F32, 4),
            "vec4<f32>(b[o], b[o + 1u], b[o + 2u], b[o + 3u])"
        );
        assert_eq!(store("a", "y", 2), "a[o] = y.x; a[o + 1u] = y.y;");
        assert_eq!(
            map("activate", "x", DataType::F32, 2),
            "vec2<f32>(activate(x.x), activate(x.y))"
        );
    }
}
