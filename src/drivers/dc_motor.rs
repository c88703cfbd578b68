//! H-bridge DC motor driver (TLE9201/VNH-style sign-magnitude bridge).
//!
//! One PWM channel sets magnitude, a direction pin sets sign and a
//! disable pin de-energises the bridge.  The throttle loop sees it only
//! as a [`MotorPort`].
//!
//! ## Safety contract
//!
//! `disable()` always drives the disable pin and zeroes PWM, even if the
//! bridge was never enabled.  Write failures latch [`DcMotor::has_fault`]
//! and are logged once per episode; the port itself cannot fail.

use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;
use log::{error, info};

use crate::app::ports::MotorPort;
use crate::error::ActuatorError;

/// PWM resolution used for duty fractions.
const DUTY_STEPS: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Open,
    Close,
}

pub struct DcMotor<P: SetDutyCycle, D: OutputPin, E: OutputPin> {
    pwm: P,
    direction_pin: D,
    disable_pin: E,
    enabled: bool,
    duty: f32,
    direction: Direction,
    disable_reason: Option<&'static str>,
    fault: Option<ActuatorError>,
}

impl<P: SetDutyCycle, D: OutputPin, E: OutputPin> DcMotor<P, D, E> {
    /// Wrap the bridge pins; the bridge starts disabled.
    pub fn new(pwm: P, direction_pin: D, disable_pin: E) -> Self {
        let mut motor = Self {
            pwm,
            direction_pin,
            disable_pin,
            enabled: false,
            duty: 0.0,
            direction: Direction::Open,
            disable_reason: None,
            fault: None,
        };
        motor.disable("init");
        motor
    }

    fn write_duty(&mut self, magnitude: f32) -> Result<(), ActuatorError> {
        let steps = (magnitude.clamp(0.0, 1.0) * f32::from(DUTY_STEPS)) as u16;
        self.pwm
            .set_duty_cycle_fraction(steps, DUTY_STEPS)
            .map_err(|_| ActuatorError::PwmWriteFailed)
    }

    fn write_direction(&mut self, direction: Direction) -> Result<(), ActuatorError> {
        let r = match direction {
            Direction::Open => self.direction_pin.set_high(),
            Direction::Close => self.direction_pin.set_low(),
        };
        r.map_err(|_| ActuatorError::GpioWriteFailed)
    }

    fn record(&mut self, result: Result<(), ActuatorError>) {
        match result {
            Ok(()) => {}
            Err(e) => {
                if self.fault.is_none() {
                    error!("DC motor: {e}");
                }
                self.fault = Some(e);
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Why the bridge was last disabled.
    pub fn disable_reason(&self) -> Option<&'static str> {
        self.disable_reason
    }

    pub fn has_fault(&self) -> Option<ActuatorError> {
        self.fault
    }

    pub fn clear_fault(&mut self) {
        self.fault = None;
    }
}

impl<P: SetDutyCycle, D: OutputPin, E: OutputPin> MotorPort for DcMotor<P, D, E> {
    fn enable(&mut self) {
        if self.enabled {
            return;
        }
        let r = self
            .disable_pin
            .set_low()
            .map_err(|_| ActuatorError::GpioWriteFailed);
        self.record(r);
        self.enabled = true;
        self.disable_reason = None;
    }

    fn disable(&mut self, reason: &'static str) {
        let r = self.write_duty(0.0);
        self.record(r);
        let r = self
            .disable_pin
            .set_high()
            .map_err(|_| ActuatorError::GpioWriteFailed);
        self.record(r);

        if self.enabled {
            info!("DC motor disabled: {reason}");
        }
        self.enabled = false;
        self.duty = 0.0;
        self.disable_reason = Some(reason);
    }

    fn set(&mut self, duty: f32) {
        let duty = if duty.is_finite() { duty.clamp(-1.0, 1.0) } else { 0.0 };
        let direction = if duty < 0.0 { Direction::Close } else { Direction::Open };

        if direction != self.direction {
            let r = self.write_direction(direction);
            self.record(r);
            self.direction = direction;
        }
        let r = self.write_duty(duty.abs());
        self.record(r);
        self.duty = duty;
    }

    fn duty(&self) -> f32 {
        self.duty
    }
}

#[cfg(test)]
mod tests {
    use core::convert::Infallible;
    use std::cell::RefCell;
    use std::rc::Rc;

    use embedded_hal::digital::ErrorType as PinErrorType;
    use embedded_hal::pwm::ErrorType as PwmErrorType;

    use super::*;

    #[derive(Default)]
    struct Bus {
        duty: u16,
        dir_high: bool,
        disabled: bool,
    }

    struct Pwm(Rc<RefCell<Bus>>);

    impl PwmErrorType for Pwm {
        type Error = Infallible;
    }

    impl SetDutyCycle for Pwm {
        fn max_duty_cycle(&self) -> u16 {
            DUTY_STEPS
        }
        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Infallible> {
            self.0.borrow_mut().duty = duty;
            Ok(())
        }
    }

    struct DirPin(Rc<RefCell<Bus>>);

    impl PinErrorType for DirPin {
        type Error = Infallible;
    }

    impl OutputPin for DirPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().dir_high = false;
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().dir_high = true;
            Ok(())
        }
    }

    struct DisPin(Rc<RefCell<Bus>>);

    impl PinErrorType for DisPin {
        type Error = Infallible;
    }

    impl OutputPin for DisPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().disabled = false;
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().disabled = true;
            Ok(())
        }
    }

    fn motor() -> (Rc<RefCell<Bus>>, DcMotor<Pwm, DirPin, DisPin>) {
        let bus = Rc::new(RefCell::new(Bus::default()));
        let m = DcMotor::new(Pwm(bus.clone()), DirPin(bus.clone()), DisPin(bus.clone()));
        (bus, m)
    }

    #[test]
    fn starts_disabled() {
        let (bus, m) = motor();
        assert!(bus.borrow().disabled);
        assert!(!m.is_enabled());
        assert_eq!(m.disable_reason(), Some("init"));
    }

    #[test]
    fn sign_selects_direction() {
        let (bus, mut m) = motor();
        m.enable();
        m.set(0.4);
        assert_eq!(bus.borrow().duty, 400);
        assert!(!bus.borrow().disabled);

        m.set(-0.25);
        assert_eq!(bus.borrow().duty, 250);
        assert!(!bus.borrow().dir_high);
        assert_eq!(m.direction(), Direction::Close);
        assert_eq!(m.duty(), -0.25);
    }

    #[test]
    fn disable_zeroes_pwm() {
        let (bus, mut m) = motor();
        m.enable();
        m.set(0.8);
        m.disable("no-ETB");
        assert_eq!(bus.borrow().duty, 0);
        assert!(bus.borrow().disabled);
        assert_eq!(m.duty(), 0.0);
        assert_eq!(m.disable_reason(), Some("no-ETB"));
    }

    #[test]
    fn non_finite_duty_is_zero() {
        let (bus, mut m) = motor();
        m.enable();
        m.set(f32::NAN);
        assert_eq!(bus.borrow().duty, 0);
        m.set(3.0);
        assert_eq!(bus.borrow().duty, 1000);
    }
}
