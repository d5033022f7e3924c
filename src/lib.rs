#![cfg_attr(not(feature = "std"), no_std)]
//! An implementation of the Mahony IMU orientation estimation filter in pure Rust.
//!
//! This is the gyroscope + accelerometer (IMU) variant of the complementary filter described by Mahony et al.,
//! in the optimised form popularised by S. Madgwick. It uses single-precision math throughout and a fast inverse
//! square root for normalisation, so its numeric behaviour matches the widely deployed C version bit for bit.
//!
//! The filter keeps no state of its own. The main entry point is [`update_imu()`], a pure function taking the
//! current [`State`] and returning the next one; [`Mahony`] wraps it for callers who prefer an object that owns
//! its state, and [`update_imu_scalars()`] exposes the flat 14-in/7-out scalar contract for bindings.
//!
//! This crate optionally supports `no_std`; the `libm` crate feature is required in `no_std` environments for the
//! precise helpers on [`Quaternion`]. The filter update itself needs neither.

#[cfg(feature = "std")]
type Math<T> = T;
#[cfg(all(feature = "libm", not(feature = "std")))]
type Math<T> = libm::Libm<T>;

/// Twice the default proportional gain (Kp = 0.5).
pub const TWO_KP: f32 = 2.0 * 0.5;

/// Twice the default integral gain (Ki = 0.0, integral feedback disabled).
pub const TWO_KI: f32 = 2.0 * 0.0;

const INV_SQRT_MAGIC: i32 = 0x5F37_59DF;

/// A quaternion, scalar first.
///
/// The default value is the identity rotation.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Quaternion(pub f32, pub f32, pub f32, pub f32);

impl Default for Quaternion {
    fn default() -> Self {
        Self(1.0, 0.0, 0.0, 0.0)
    }
}

impl From<[f32; 4]> for Quaternion {
    fn from(value: [f32; 4]) -> Self {
        Self(value[0], value[1], value[2], value[3])
    }
}

impl From<Quaternion> for [f32; 4] {
    fn from(value: Quaternion) -> Self {
        [value.0, value.1, value.2, value.3]
    }
}

impl Quaternion {
    /// Euclidean norm, computed with a precise square root.
    pub fn norm(&self) -> f32 {
        Math::<f32>::sqrt(square(self.0) + square(self.1) + square(self.2) + square(self.3))
    }

    /// Returns `[roll, pitch, yaw]` in radians (Z-Y-X sequence).
    pub fn euler_angles(&self) -> [f32; 3] {
        let Self(q0, q1, q2, q3) = *self;
        let roll = Math::<f32>::atan2(q0 * q1 + q2 * q3, 0.5 - q1 * q1 - q2 * q2);
        let pitch = Math::<f32>::asin((-2.0 * (q1 * q3 - q0 * q2)).clamp(-1.0, 1.0));
        let yaw = Math::<f32>::atan2(q1 * q2 + q0 * q3, 0.5 - q2 * q2 - q3 * q3);
        [roll, pitch, yaw]
    }
}

/// Struct containing the tuning parameters of the filter.
///
/// Both gains are stored pre-multiplied by two, which is how the update step consumes them. The defaults are
/// [`TWO_KP`] and [`TWO_KI`], i.e. proportional-only correction.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Params {
    /// Twice the proportional gain.
    ///
    /// Scales how strongly the measured gravity direction pulls the estimate each sample.
    ///
    /// Default value: 1.0
    pub two_kp: f32,

    /// Twice the integral gain.
    ///
    /// Integral feedback (gyroscope bias compensation) is only active when this is positive. Otherwise the
    /// accumulator is cleared on every update to prevent windup.
    ///
    /// Default value: 0.0
    pub two_ki: f32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            two_kp: TWO_KP,
            two_ki: TWO_KI,
        }
    }
}

/// Struct containing the filter state.
///
/// The state is owned by the caller and threaded through [`update_imu()`]: feed each returned value into the next
/// call. Independent sensors just use independent `State` values.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct State {
    /// Current orientation estimate.
    pub quat: Quaternion,

    /// Integral of the orientation error, scaled by [`Params::two_ki`].
    ///
    /// Always `[0.0; 3]` after an update when integral feedback is disabled.
    pub integral_fb: [f32; 3],
}

impl From<[f32; 7]> for State {
    fn from(value: [f32; 7]) -> Self {
        Self {
            quat: Quaternion(value[0], value[1], value[2], value[3]),
            integral_fb: [value[4], value[5], value[6]],
        }
    }
}

impl From<State> for [f32; 7] {
    fn from(value: State) -> Self {
        let Quaternion(q0, q1, q2, q3) = value.quat;
        let [ix, iy, iz] = value.integral_fb;
        [q0, q1, q2, q3, ix, iy, iz]
    }
}

#[inline(always)]
fn square(t: f32) -> f32 {
    t * t
}

/// Fast approximation of `1 / sqrt(x)`.
///
/// Reinterprets the bits of `x`, applies the `0x5F3759DF` magic constant and refines with a single Newton
/// iteration. The relative error is below 0.2% for positive normal inputs. The result is meaningless for zero or
/// negative `x`, but the function never panics.
#[inline]
pub fn inv_sqrt(x: f32) -> f32 {
    let half_x = 0.5 * x;
    let i = INV_SQRT_MAGIC.wrapping_sub((x.to_bits() as i32) >> 1);
    let y = f32::from_bits(i as u32);
    y * (1.5 - half_x * y * y)
}

/// Performs one filter step using gyroscope (rad/s) and accelerometer measurements.
///
/// `dt` is the time since the previous update in seconds. The accelerometer is only used for its direction; an
/// exact `[0.0; 3]` sample is treated as invalid and the orientation is propagated by the gyroscope alone.
///
/// ```rust
/// # use mahony_rs::{update_imu, Params, State};
/// let params = Params::default();
/// let mut state = State::default();
/// for _ in 0..100 {
///     state = update_imu(&params, [0.0, 0.0, 0.1], [0.0, 0.0, 9.81], 0.01, state);
/// }
/// ```
pub fn update_imu(params: &Params, gyr: [f32; 3], acc: [f32; 3], dt: f32, state: State) -> State {
    let Quaternion(mut q0, mut q1, mut q2, mut q3) = state.quat;
    let [mut gx, mut gy, mut gz] = gyr;
    let mut integral_fb = if params.two_ki > 0.0 {
        state.integral_fb
    } else {
        // prevent integral windup
        [0.0; 3]
    };

    // ignore [0 0 0] samples, they would produce NaN during normalisation
    if acc != [0.0; 3] {
        let recip_norm = inv_sqrt(acc[0] * acc[0] + acc[1] * acc[1] + acc[2] * acc[2]);
        let ax = acc[0] * recip_norm;
        let ay = acc[1] * recip_norm;
        let az = acc[2] * recip_norm;

        // estimated direction of gravity, halved
        let half_vx = q1 * q3 - q0 * q2;
        let half_vy = q0 * q1 + q2 * q3;
        let half_vz = q0 * q0 - 0.5 + q3 * q3;

        // error is the cross product between measured and estimated direction of gravity
        let half_ex = ay * half_vz - az * half_vy;
        let half_ey = az * half_vx - ax * half_vz;
        let half_ez = ax * half_vy - ay * half_vx;

        if params.two_ki > 0.0 {
            integral_fb[0] += params.two_ki * half_ex * dt;
            integral_fb[1] += params.two_ki * half_ey * dt;
            integral_fb[2] += params.two_ki * half_ez * dt;
            gx += integral_fb[0];
            gy += integral_fb[1];
            gz += integral_fb[2];
        }

        gx += params.two_kp * half_ex;
        gy += params.two_kp * half_ey;
        gz += params.two_kp * half_ez;
    } else {
        #[cfg(feature = "defmt")]
        defmt::trace!("zero accelerometer sample, skipping correction");
    }

    // integrate rate of change of quaternion
    gx *= 0.5 * dt;
    gy *= 0.5 * dt;
    gz *= 0.5 * dt;
    let qa = q0;
    let qb = q1;
    let qc = q2;
    q0 += -qb * gx - qc * gy - q3 * gz;
    q1 += qa * gx + qc * gz - q3 * gy;
    q2 += qa * gy - qb * gz + q3 * gx;
    q3 += qa * gz + qb * gy - qc * gx;

    let recip_norm = inv_sqrt(q0 * q0 + q1 * q1 + q2 * q2 + q3 * q3);
    State {
        quat: Quaternion(
            q0 * recip_norm,
            q1 * recip_norm,
            q2 * recip_norm,
            q3 * recip_norm,
        ),
        integral_fb,
    }
}

/// Flat form of [`update_imu()`] with the default [`Params`].
///
/// Returns `[q0, q1, q2, q3, integral_fb_x, integral_fb_y, integral_fb_z]`, ready to be passed back in as the last
/// seven arguments of the next call.
#[allow(clippy::too_many_arguments)]
pub fn update_imu_scalars(
    gx: f32,
    gy: f32,
    gz: f32,
    ax: f32,
    ay: f32,
    az: f32,
    dt: f32,
    q0: f32,
    q1: f32,
    q2: f32,
    q3: f32,
    integral_fb_x: f32,
    integral_fb_y: f32,
    integral_fb_z: f32,
) -> [f32; 7] {
    let state = State::from([q0, q1, q2, q3, integral_fb_x, integral_fb_y, integral_fb_z]);
    update_imu(&Params::default(), [gx, gy, gz], [ax, ay, az], dt, state).into()
}

/// A Mahony orientation filter that owns its state.
///
/// This is a thin wrapper around [`update_imu()`] for callers that would rather not carry [`State`] around
/// themselves.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mahony {
    params: Params,
    state: State,
}

impl Mahony {
    /// Creates a new filter starting at the identity orientation.
    ///
    /// ```rust
    /// # use mahony_rs::Mahony;
    /// let mut mahony = Mahony::new(None);
    /// mahony.update_imu([0.0, 0.0, 0.0], [0.0, 0.0, 9.81], 0.01);
    /// let quat = mahony.quat();
    /// ```
    pub fn new(params: Option<Params>) -> Self {
        Self {
            params: params.unwrap_or_default(),
            state: Default::default(),
        }
    }

    /// Performs one update step. See [`update_imu()`].
    pub fn update_imu(&mut self, gyr: [f32; 3], acc: [f32; 3], dt: f32) {
        self.state = update_imu(&self.params, gyr, acc, dt, self.state);
    }

    /// Returns the current orientation estimate.
    pub fn quat(&self) -> Quaternion {
        self.state.quat
    }

    /// Returns the current integral feedback accumulator.
    pub fn integral_fb(&self) -> [f32; 3] {
        self.state.integral_fb
    }

    /// Returns the current parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns the current state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Gets the current state for modification.
    ///
    /// Useful to start from a known orientation or to carry the accumulator over from another filter.
    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    /// Resets the orientation to identity and clears the accumulator.
    pub fn reset_state(&mut self) {
        self.state = Default::default();
    }
}
