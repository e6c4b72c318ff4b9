use telemetry_api::{Sample, SampleSource, now_ms};

/// Ускорение свободного падения, м/с².
const GRAVITY: f64 = 9.80665;

// ═══════════════════════════════════════════════════════════════
//  Simulated accelerometer
// ═══════════════════════════════════════════════════════════════

/// Устройство, лежащее на столе и медленно покачивающееся:
/// гравитация распределяется между осями по углу наклона, сверху шум.
pub struct SimulatedAccelerometer {
    /// xorshift64, никогда не ноль.
    state: u64,
    tilt: f64,
    roll: f64,
    noise: f64,
}

impl SimulatedAccelerometer {
    /// `seed == 0`: засеять от часов.
    pub fn new(seed: i64) -> Self {
        let state = match seed {
            0 => now_ms().unsigned_abs() | 1,
            seed => seed as u64,
        };
        Self { state, tilt: 0.0, roll: 0.0, noise: 0.05 }
    }

    /// Равномерно в [-1, 1).
    fn uniform(&mut self) -> f64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        let unit = (self.state >> 11) as f64 / (1u64 << 53) as f64;
        unit * 2.0 - 1.0
    }

    fn jitter(&mut self) -> f64 {
        self.uniform() * self.noise
    }

    fn step_angle(&mut self, angle: f64) -> f64 {
        // случайное блуждание, не дальше ±30°
        let limit = std::f64::consts::FRAC_PI_6;
        (angle + self.uniform() * 0.02).clamp(-limit, limit)
    }
}

impl SampleSource for SimulatedAccelerometer {
    fn read(&mut self) -> Option<Sample> {
        self.tilt = self.step_angle(self.tilt);
        self.roll = self.step_angle(self.roll);

        let x = GRAVITY * self.roll.sin() + self.jitter();
        let y = GRAVITY * self.tilt.sin() * self.roll.cos() + self.jitter();
        let z = GRAVITY * self.tilt.cos() * self.roll.cos() + self.jitter();
        Some(Sample::now(x, y, z))
    }
}
