//! HID usage pages and usages referenced by the synthesized descriptors.

pub mod page {
    pub const GENERIC: u16 = 0x01;
    pub const SIMULATION: u16 = 0x02;
    pub const KEYBOARD: u16 = 0x07;
    pub const BUTTON: u16 = 0x09;
    pub const ORDINAL: u16 = 0x0a;
    pub const DIGITIZER: u16 = 0x0d;
    pub const HAPTICS: u16 = 0x0e;
    pub const PID: u16 = 0x0f;
    pub const CONSUMER: u16 = 0x0c;
    pub const VENDOR_DEFINED_BEGIN: u16 = 0xff00;
}

pub mod generic {
    pub const POINTER: u16 = 0x01;
    pub const MOUSE: u16 = 0x02;
    pub const JOYSTICK: u16 = 0x04;
    pub const GAMEPAD: u16 = 0x05;
    pub const KEYBOARD: u16 = 0x06;
    pub const KEYPAD: u16 = 0x07;
    pub const MULTI_AXIS_CONTROLLER: u16 = 0x08;
    pub const X: u16 = 0x30;
    pub const Y: u16 = 0x31;
    pub const Z: u16 = 0x32;
    pub const RX: u16 = 0x33;
    pub const RY: u16 = 0x34;
    pub const RZ: u16 = 0x35;
    pub const SLIDER: u16 = 0x36;
    pub const DIAL: u16 = 0x37;
    pub const WHEEL: u16 = 0x38;
    pub const HATSWITCH: u16 = 0x39;
}

pub mod simulation {
    pub const RUDDER: u16 = 0xba;
    pub const THROTTLE: u16 = 0xbb;
    pub const ACCELERATOR: u16 = 0xc4;
    pub const BRAKE: u16 = 0xc5;
}

pub mod digitizer {
    pub const PEN: u16 = 0x02;
    pub const TOUCH_SCREEN: u16 = 0x04;
    pub const TOUCH_PAD: u16 = 0x05;
    pub const TIP_PRESSURE: u16 = 0x30;
    pub const X_TILT: u16 = 0x3d;
    pub const Y_TILT: u16 = 0x3e;
}

pub mod consumer {
    pub const VOLUME: u16 = 0xe0;
}

pub mod haptics {
    pub const SIMPLE_CONTROLLER: u16 = 0x01;
    pub const WAVEFORM_LIST: u16 = 0x10;
    pub const DURATION_LIST: u16 = 0x11;
    pub const MANUAL_TRIGGER: u16 = 0x21;
    pub const INTENSITY: u16 = 0x23;
    pub const WAVEFORM_CUTOFF_TIME: u16 = 0x28;
    pub const WAVEFORM_STOP: u16 = 0x1001;
    pub const WAVEFORM_NULL: u16 = 0x1002;
    pub const WAVEFORM_RUMBLE: u16 = 0x1003;
    pub const WAVEFORM_BUZZ: u16 = 0x1004;
}

pub mod pid {
    pub const PHYSICAL_INTERFACE_DEVICE: u16 = 0x01;
    pub const SET_EFFECT_REPORT: u16 = 0x21;
    pub const EFFECT_BLOCK_INDEX: u16 = 0x22;
    pub const EFFECT_TYPE: u16 = 0x25;
    pub const ET_CONSTANT_FORCE: u16 = 0x26;
    pub const ET_RAMP: u16 = 0x27;
    pub const ET_SQUARE: u16 = 0x30;
    pub const ET_SINE: u16 = 0x31;
    pub const ET_TRIANGLE: u16 = 0x32;
    pub const ET_SAWTOOTH_UP: u16 = 0x33;
    pub const ET_SAWTOOTH_DOWN: u16 = 0x34;
    pub const DURATION: u16 = 0x50;
    pub const SAMPLE_PERIOD: u16 = 0x51;
    pub const GAIN: u16 = 0x52;
    pub const TRIGGER_BUTTON: u16 = 0x53;
    pub const TRIGGER_REPEAT_INTERVAL: u16 = 0x54;
    pub const SET_PERIODIC_REPORT: u16 = 0x6e;
    pub const OFFSET: u16 = 0x6f;
    pub const MAGNITUDE: u16 = 0x70;
    pub const PHASE: u16 = 0x71;
    pub const PERIOD: u16 = 0x72;
    pub const SET_CONSTANT_FORCE_REPORT: u16 = 0x73;
    pub const EFFECT_OPERATION_REPORT: u16 = 0x77;
    pub const EFFECT_OPERATION: u16 = 0x78;
    pub const OP_EFFECT_START: u16 = 0x79;
    pub const OP_EFFECT_START_SOLO: u16 = 0x7a;
    pub const OP_EFFECT_STOP: u16 = 0x7b;
    pub const LOOP_COUNT: u16 = 0x7c;
    pub const DEVICE_CONTROL_REPORT: u16 = 0x95;
    pub const DEVICE_CONTROL: u16 = 0x96;
    pub const DC_ENABLE_ACTUATORS: u16 = 0x97;
    pub const DC_DISABLE_ACTUATORS: u16 = 0x98;
    pub const DC_STOP_ALL_EFFECTS: u16 = 0x99;
    pub const DC_DEVICE_RESET: u16 = 0x9a;
    pub const DC_DEVICE_PAUSE: u16 = 0x9b;
    pub const DC_DEVICE_CONTINUE: u16 = 0x9c;
    pub const START_DELAY: u16 = 0xa7;
}
