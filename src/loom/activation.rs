use super::num::Float;

/// Point-wise nonlinearities shared by both backends.
///
/// Every variant maps to an integer tag consumed by the `func` kernel, so the same
/// compiled kernel serves all of them at dispatch time.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Activation {
    /// `f(x) = x`.
    #[default]
    Linear,
    /// `f(x) = 1 / (1 + e^-x)`.
    Sigmoid,
    /// `f(x) = tanh(x)`.
    Tanh,
    /// `f(x) = max(0, x)`.
    Relu,
    /// `f(x) = x` for positive `x`, `alpha * x` otherwise.
    LeakyRelu(f32),
    /// `f(x) = x` for positive `x`, `alpha * (e^x - 1)` otherwise.
    Elu(f32),
    /// `f(x) = x²`, the point-wise part of a squared-error loss.
    Square,
    /// `f(x) = x * Φ(x)`, in the tanh approximation.
    Gelu,
}

impl Activation {
    /// Tag selecting the branch in the `func` kernel.
    pub const fn tag(self) -> u32 {
        match self {
            Activation::Linear => 0,
            Activation::Sigmoid => 1,
            Activation::Tanh => 2,
            Activation::Relu => 3,
            Activation::LeakyRelu(_) => 4,
            Activation::Elu(_) => 5,
            Activation::Square => 6,
            Activation::Gelu => 7,
        }
    }

    /// Slope or scale parameter; zero for parameterless variants.
    pub const fn alpha(self) -> f32 {
        match self {
            Activation::LeakyRelu(alpha) | Activation::Elu(alpha) => alpha,
            _ => 0.0,
        }
    }

    /// Evaluates the activation, or its derivative if `derivative` is set.
    pub fn eval(self, x: f32, derivative: bool) -> f32 {
        match (self, derivative) {
            (Activation::Linear, false) => x,
            (Activation::Linear, true) => 1.0,
            (Activation::Sigmoid, false) => sigmoid(x),
            (Activation::Sigmoid, true) => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            (Activation::Tanh, false) => x.tanh(),
            (Activation::Tanh, true) => {
                let t = x.tanh();
                1.0 - t * t
            }
            (Activation::Relu, false) => x.max(0.0),
            (Activation::Relu, true) => step(x, 1.0, 0.0),
            (Activation::LeakyRelu(alpha), false) => step(x, x, alpha * x),
            (Activation::LeakyRelu(alpha), true) => step(x, 1.0, alpha),
            (Activation::Elu(alpha), false) => step(x, x, alpha * (x.exp() - 1.0)),
            (Activation::Elu(alpha), true) => step(x, 1.0, alpha * x.exp()),
            (Activation::Square, false) => x * x,
            (Activation::Square, true) => 2.0 * x,
            (Activation::Gelu, false) => 0.5 * x * (1.0 + gelu_tanh(x)),
            (Activation::Gelu, true) => {
                let t = gelu_tanh(x);
                let inner = GELU_SCALE * (1.0 + 3.0 * GELU_CUBIC * x * x);
                0.5 * (1.0 + t) + 0.5 * x * (1.0 - t * t) * inner
            }
        }
    }

    /// Evaluates on any float element, rounding through `f32`.
    #[inline]
    pub fn apply<T: Float>(self, x: T, derivative: bool) -> T {
        T::from_f32(self.eval(x.to_f32(), derivative))
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// `sqrt(2 / pi)`.
const GELU_SCALE: f32 = 0.797_884_6;
const GELU_CUBIC: f32 = 0.044_715;

#[inline]
fn gelu_tanh(x: f32) -> f32 {
    (GELU_SCALE * (x + GELU_CUBIC * x * x * x)).tanh()
}

#[inline]
fn step(x: f32, positive: f32, otherwise: f32) -> f32 {
    if x > 0.0 { positive } else { otherwise }
}

#[cfg(test)]
mod tests {
    use super::Activation;

    #[test]
    fn test_activation() {
        assert_eq!(Activation::Sigmoid.eval(0.0, false), 0.5);
        assert_eq!(Activation::Sigmoid.eval(0.0, true), 0.25);
        assert_eq!(Activation::Relu.eval(-3.0, false), 0.0);
        assert_eq!(Activation::Relu.eval(3.0, false), 3.0);
        assert_eq!(Activation::Relu.eval(3.0, true), 1.0);
        assert_eq!(Activation::Relu.eval(0.0, true), 0.0);
        assert_eq!(Activation::Linear.eval(-7.5, false), -7.5);
        assert_eq!(Activation::Linear.eval(-7.5, true), 1.0);
        assert_eq!(Activation::LeakyRelu(0.1).eval(-2.0, false), 0.1 * -2.0);
        assert_eq!(Activation::LeakyRelu(0.1).eval(-2.0, true), 0.1);
        assert_eq!(Activation::Elu(1.0).eval(2.0, false), 2.0);
        assert_eq!(Activation::Square.eval(-3.0, false), 9.0);
        assert_eq!(Activation::Square.eval(-3.0, true), -6.0);
        assert_eq!(Activation::Tanh.eval(0.0, false), 0.0);
        assert_eq!(Activation::Tanh.eval(0.0, true), 1.0);
        assert_eq!(Activation::Gelu.eval(0.0, false), 0.0);
        assert_eq!(Activation::Gelu.eval(0.0, true), 0.5);
    }

    #[test]
    fn test_gelu() {
        assert!((Activation::Gelu.eval(1.0, false) - 0.841_192).abs() < 1e-5);
        assert!((Activation::Gelu.eval(-1.0, false) + 0.158_808).abs() < 1e-5);
        assert!(Activation::Gelu.eval(6.0, false) > 5.99);

        // derivative against a central difference
        let h = 1e-3;
        for x in [-2.0f32, -0.5, 0.3, 1.7] {
            let numeric = (Activation::Gelu.eval(x + h, false)
                - Activation::Gelu.eval(x - h, false))
                / (2.0 * h);
            assert!((Activation::Gelu.eval(x, true) - numeric).abs() < 1e-2, "at {x}");
        }
    }
}
