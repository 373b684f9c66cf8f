//! Embassy runtime binding the rig to the STM32 peripherals.
//!
//! One task owns the whole rig and ticks it every millisecond; a second
//! task drains the host UART into a pipe so the command loop can read
//! without blocking. All pins are claimed here, once, and handed into the
//! state machines as owned handles.

mod dac;

use core::cell::RefCell;
use core::mem::MaybeUninit;

use alloc::vec::Vec;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::RawRestoreState;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::bind_interrupts;
use embassy_stm32::gpio::{Flex, Level, Output, Pull, Speed};
use embassy_stm32::i2c::I2c;
use embassy_stm32::mode::Async;
use embassy_stm32::peripherals;
use embassy_stm32::time::Hertz;
use embassy_stm32::usart::{self, Uart, UartRx, UartTx};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pipe::Pipe;
use embassy_time::{Duration, Instant, Ticker, block_for};
use embedded_alloc::LlffHeap;
use static_cell::StaticCell;

use laser_core::calibration::Sleeper;
use laser_core::channel::PulseGenerator;
use laser_core::clock::{TickClock, Ticks};
use laser_core::io::{DigitalInput, DigitalOutput};
use laser_core::rig::{HostLink, Rig};
use laser_core::trigger::{
    TRIGGER_SOURCE_COUNT, TriggerCoordinator, TriggerSource, TriggerSources,
};

use crate::board;
use crate::faultlog::FaultRing;
use dac::{DacChannel, QuadDac};

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

bind_interrupts!(struct Irqs {
    USART1 => usart::InterruptHandler<peripherals::USART1>;
});

#[global_allocator]
static HEAP: LlffHeap = LlffHeap::empty();

static HOST_RX: Pipe<CriticalSectionRawMutex, 1024> = Pipe::new();
static DAC_BUS: StaticCell<RefCell<QuadDac>> = StaticCell::new();

/// Millisecond clock derived from the embassy time driver.
struct BoardClock;

impl TickClock for BoardClock {
    fn now(&self) -> Ticks {
        Ticks::new(Instant::now().as_millis() as u32)
    }
}

/// Push-pull gate output (laser TTL or sync mask).
struct GatePin(Output<'static>);

impl GatePin {
    fn new(pin: Output<'static>) -> Self {
        Self(pin)
    }
}

impl DigitalOutput for GatePin {
    fn set_high(&mut self) {
        self.0.set_high();
    }

    fn set_low(&mut self) {
        self.0.set_low();
    }

    fn is_high(&self) -> bool {
        self.0.is_set_high()
    }
}

/// Trigger-bank line; flexible so the onboard trigger can flip between
/// input and mirror-output roles.
struct TriggerPin(Flex<'static>);

impl DigitalInput for TriggerPin {
    fn is_high(&self) -> bool {
        self.0.is_high()
    }
}

impl DigitalOutput for TriggerPin {
    fn set_high(&mut self) {
        self.0.set_high();
    }

    fn set_low(&mut self) {
        self.0.set_low();
    }

    fn is_high(&self) -> bool {
        self.0.is_high()
    }
}

/// Pool of physical trigger lines, claimed one owner at a time.
struct TriggerBank {
    inputs: [Option<TriggerPin>; TRIGGER_SOURCE_COUNT],
    priming: Option<TriggerPin>,
}

impl TriggerBank {
    fn stash(&mut self, source: TriggerSource, mut pin: Flex<'static>) {
        pin.set_as_input(Pull::Down);
        self.inputs[source.index()] = Some(TriggerPin(pin));
    }
}

impl TriggerSources for TriggerBank {
    type Input = TriggerPin;
    type Mirror = TriggerPin;

    fn claim_input(&mut self, source: TriggerSource) -> TriggerPin {
        let mut pin = self.inputs[source.index()]
            .take()
            .expect("trigger line already claimed");
        pin.0.set_as_input(Pull::Down);
        pin
    }

    fn release_input(&mut self, source: TriggerSource, pin: TriggerPin) {
        self.inputs[source.index()] = Some(pin);
    }

    fn claim_priming(&mut self) -> TriggerPin {
        self.priming.take().expect("priming line already claimed")
    }

    // The onboard trigger line doubles as the mirror output, so the mirror
    // is claimed out of the same slot the internal input lives in.
    fn claim_mirror(&mut self) -> TriggerPin {
        let mut pin = self.inputs[TriggerSource::Internal.index()]
            .take()
            .expect("onboard line already claimed");
        pin.0.set_low();
        pin.0.set_as_output(Speed::Low);
        pin
    }

    fn release_mirror(&mut self, mut pin: TriggerPin) {
        pin.0.set_as_input(Pull::Down);
        self.inputs[TriggerSource::Internal.index()] = Some(pin);
    }
}

/// Host link: non-blocking reads from the UART pipe, blocking writes.
struct UartLink {
    tx: UartTx<'static, Async>,
}

impl HostLink for UartLink {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        HOST_RX.try_read(buf).unwrap_or(0)
    }

    fn write_line(&mut self, line: &str) {
        if self.tx.blocking_write(line.as_bytes()).is_err() {
            defmt::warn!("host reply dropped");
        }
    }
}

/// Coarse blocking delay used only by the calibration sweep, which runs
/// while no channel is pulsing.
struct BlockingSleeper;

impl Sleeper for BlockingSleeper {
    fn sleep_ms(&mut self, ms: u32) {
        block_for(Duration::from_millis(u64::from(ms)));
    }
}

#[embassy_executor::task]
async fn host_rx_task(mut rx: UartRx<'static, Async>) {
    let mut buf = [0u8; 64];
    loop {
        match rx.read_until_idle(&mut buf).await {
            Ok(len) if len > 0 => {
                let mut pending = &buf[..len];
                while !pending.is_empty() {
                    let written = HOST_RX.write(pending).await;
                    pending = &pending[written..];
                }
            }
            Ok(_) => {}
            Err(_) => defmt::warn!("host uart receive error"),
        }
    }
}

fn init_heap() {
    static mut HEAP_MEM: [MaybeUninit<u8>; board::HEAP_SIZE] =
        [MaybeUninit::uninit(); board::HEAP_SIZE];
    unsafe {
        HEAP.init(&raw mut HEAP_MEM as usize, board::HEAP_SIZE);
    }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    init_heap();

    let p = hal::init(hal::Config::default());

    let mut uart_config = usart::Config::default();
    uart_config.baudrate = board::UART_BAUD;
    let uart = Uart::new(
        p.USART1,
        p.PA10,
        p.PA9,
        Irqs,
        p.DMA1_CH1,
        p.DMA1_CH2,
        uart_config,
    )
    .expect("host uart configuration");
    let (tx, rx) = uart.split();

    spawner
        .spawn(host_rx_task(rx))
        .expect("failed to spawn host rx task");

    let i2c = I2c::new_blocking(p.I2C1, p.PB6, p.PB7, Hertz(400_000), Default::default());
    let bus: &'static RefCell<QuadDac> = DAC_BUS.init(RefCell::new(QuadDac::new(i2c)));

    let gates = [
        GatePin::new(Output::new(p.PA0, Level::Low, Speed::Low)),
        GatePin::new(Output::new(p.PB3, Level::Low, Speed::Low)),
        GatePin::new(Output::new(p.PA1, Level::Low, Speed::Low)),
        GatePin::new(Output::new(p.PB4, Level::Low, Speed::Low)),
        GatePin::new(Output::new(p.PA4, Level::Low, Speed::Low)),
        GatePin::new(Output::new(p.PB5, Level::Low, Speed::Low)),
        GatePin::new(Output::new(p.PA5, Level::Low, Speed::Low)),
        GatePin::new(Output::new(p.PA6, Level::Low, Speed::Low)),
    ];

    let mut channels: Vec<PulseGenerator<GatePin, DacChannel>> = Vec::new();
    for (index, gate) in gates.into_iter().enumerate() {
        let pair = board::CHANNEL_PAIRS[index / 2];
        if index % 2 == 0 {
            let dac = DacChannel::new(bus, (index / 2) as u8);
            channels.push(PulseGenerator::new(pair.0, gate, Some(dac)));
        } else {
            channels.push(PulseGenerator::mask(pair.1, gate));
        }
    }

    let mut bank = TriggerBank {
        inputs: [None, None, None, None, None, None],
        priming: None,
    };
    bank.stash(TriggerSource::Internal, Flex::new(p.PA8));
    bank.stash(TriggerSource::Internal2, Flex::new(p.PA11));
    bank.stash(TriggerSource::External0, Flex::new(p.PA12));
    bank.stash(TriggerSource::External1, Flex::new(p.PA15));
    bank.stash(TriggerSource::External2, Flex::new(p.PC6));
    bank.stash(TriggerSource::External3, Flex::new(p.PB0));
    let mut priming = Flex::new(p.PB1);
    priming.set_as_input(Pull::Down);
    bank.priming = Some(TriggerPin(priming));

    let clock = BoardClock;
    let mut trigger = TriggerCoordinator::new(board::TRIGGER_NAME, &mut bank);
    let members = board::DEFAULT_TRIGGER_MEMBERS
        .iter()
        .map(|name| alloc::string::String::from(*name))
        .collect();
    trigger.set_members(members, clock.now(), &mut channels);

    let mut enable = Flex::new(p.PB2);
    enable.set_as_input(Pull::Down);

    let mut rig = Rig::new(channels, trigger, bank, Some(TriggerPin(enable)));

    let mut link = UartLink { tx };
    let mut sleeper = BlockingSleeper;
    let mut faults = FaultRing::new();

    defmt::info!("laser rig ready");
    let mut ticker = Ticker::every(Duration::from_millis(board::TICK_INTERVAL_MS));
    loop {
        ticker.next().await;
        rig.iterate(clock.now(), &mut link, &mut sleeper, &mut faults);
    }
}
