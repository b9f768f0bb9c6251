//! Analog sampler to nRF24L01 uplink.
//!
//! TIM2 ticks at 62.5 kHz; the rate divider accepts one tick in eleven,
//! each accepted tick stores one 8-bit ADC sample, and every completed
//! 32-byte frame is handed to the idle loop for transmission. The timer
//! task owns no radio or SPI handle, so the interrupt can never end up
//! inside a bus transaction.

#![no_main]
#![no_std]

use panic_probe as _;
use defmt_rtt as _; // global logger

use cortex_m::asm;
use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use stm32l4xx_hal::rcc::Clocks;

use audio_link::nrf24::Nrf24;
use audio_link::pool::SamplePool;
use audio_link::sampler::RateDivider;
use audio_link::FRAME_LEN;

/// Hardware tick rate driving the sampler.
const TICK_RATE_HZ: u32 = 62_500;
/// Accept one tick in `TICK_DIVIDER + 1`, giving an effective sample
/// rate of about 5.7 kHz.
const TICK_DIVIDER: u8 = 10;
/// Watchdog window; fed from a 80 ms task.
const WATCHDOG_PERIOD_MS: u32 = 100;

/// Busy-wait delays timed off the core clock, for the radio's settle
/// windows and the ADC bring-up.
#[derive(Clone, Copy)]
pub struct CycleDelay {
    cycles_per_us: u32,
}

impl CycleDelay {
    fn new(clocks: &Clocks) -> Self {
        CycleDelay {
            cycles_per_us: clocks.sysclk().raw() / 1_000_000,
        }
    }
}

impl DelayUs<u16> for CycleDelay {
    fn delay_us(&mut self, us: u16) {
        asm::delay(u32::from(us) * self.cycles_per_us);
    }
}

impl DelayUs<u32> for CycleDelay {
    fn delay_us(&mut self, us: u32) {
        asm::delay(us * self.cycles_per_us);
    }
}

impl DelayMs<u16> for CycleDelay {
    fn delay_ms(&mut self, ms: u16) {
        // per-millisecond steps keep the cycle count well inside u32
        for _ in 0..ms {
            DelayUs::<u32>::delay_us(self, 1_000);
        }
    }
}

#[rtic::app(device = stm32l4xx_hal::pac, peripherals = true, dispatchers = [SDMMC1])]
mod app {
    use dwt_systick_monotonic::{DwtSystick, ExtU64};
    use stm32l4xx_hal::{
        adc::ADC,
        gpio::{Alternate, Analog, Output, PushPull, PA0, PA5, PA6, PA7, PB0, PB1},
        pac::{SPI1, TIM2},
        prelude::*,
        spi::Spi,
        timer::{Event, Timer},
        watchdog::IndependentWatchdog,
    };

    use super::*;

    type RadioBus = Spi<
        SPI1,
        (
            PA5<Alternate<PushPull, 5>>,
            PA6<Alternate<PushPull, 5>>,
            PA7<Alternate<PushPull, 5>>,
        ),
    >;
    type Radio = Nrf24<RadioBus, PB1<Output<PushPull>>, PB0<Output<PushPull>>, CycleDelay>;

    #[monotonic(binds = SysTick, default = true)]
    type MonoTimer = DwtSystick<80_000_000>;

    #[shared]
    struct Shared {
        pool: SamplePool<FRAME_LEN>,
    }

    #[local]
    struct Local {
        divider: RateDivider,
        adc: ADC,
        adc_pin: PA0<Analog>,
        tick_timer: Timer<TIM2>,
        radio: Radio,
        watchdog: IndependentWatchdog,
    }

    #[init]
    fn init(mut cx: init::Context) -> (Shared, Local, init::Monotonics) {
        defmt::info!("init");

        let mut flash = cx.device.FLASH.constrain();
        let mut rcc = cx.device.RCC.constrain();
        let mut pwr = cx.device.PWR.constrain(&mut rcc.apb1r1);

        let clocks = rcc.cfgr.sysclk(80.MHz()).freeze(&mut flash.acr, &mut pwr);

        // GPIO
        let mut gpioa = cx.device.GPIOA.split(&mut rcc.ahb2);
        let mut gpiob = cx.device.GPIOB.split(&mut rcc.ahb2);

        // Radio
        let radio = {
            let sck: PA5<Alternate<PushPull, 5>> = gpioa.pa5.into_alternate(
                &mut gpioa.moder,
                &mut gpioa.otyper,
                &mut gpioa.afrl,
            );
            let miso: PA6<Alternate<PushPull, 5>> = gpioa.pa6.into_alternate(
                &mut gpioa.moder,
                &mut gpioa.otyper,
                &mut gpioa.afrl,
            );
            let mosi: PA7<Alternate<PushPull, 5>> = gpioa.pa7.into_alternate(
                &mut gpioa.moder,
                &mut gpioa.otyper,
                &mut gpioa.afrl,
            );

            let spi = Spi::spi1(
                cx.device.SPI1,
                (sck, miso, mosi),
                embedded_hal::spi::MODE_0,
                1.MHz(),
                clocks,
                &mut rcc.apb2,
            );

            let csn = gpiob
                .pb1
                .into_push_pull_output(&mut gpiob.moder, &mut gpiob.otyper);
            let ce = gpiob
                .pb0
                .into_push_pull_output(&mut gpiob.moder, &mut gpiob.otyper);

            let mut radio = Nrf24::new(spi, csn, ce, CycleDelay::new(&clocks));
            radio.init().unwrap();
            radio.enable().unwrap();

            // nothing in the link can verify the part is present; the
            // status readout in the boot log is the only hint
            match radio.status() {
                Ok(status) => defmt::debug!("radio status: {=u8:b}", status),
                Err(_) => defmt::error!("radio status probe failed"),
            }

            radio
        };

        // ADC, signal input on PA0
        let adc = {
            let mut delay = CycleDelay::new(&clocks);
            ADC::new(
                cx.device.ADC1,
                cx.device.ADC_COMMON,
                &mut rcc.ahb2,
                &mut rcc.ccipr,
                &mut delay,
            )
        };
        let adc_pin = gpioa.pa0.into_analog(&mut gpioa.moder, &mut gpioa.pupdr);

        // Sampling tick
        let tick_timer = {
            let mut timer = Timer::tim2(
                cx.device.TIM2,
                TICK_RATE_HZ.Hz(),
                clocks,
                &mut rcc.apb1r1,
            );
            timer.listen(Event::TimeOut);
            timer
        };

        // setup and start independent watchdog
        // initialisation must complete before the watchdog triggers
        let watchdog = {
            let mut wd = IndependentWatchdog::new(cx.device.IWDG);
            wd.start(WATCHDOG_PERIOD_MS.millis());
            wd
        };

        // Monotonics
        let mono = DwtSystick::new(
            &mut cx.core.DCB,
            cx.core.DWT,
            cx.core.SYST,
            clocks.sysclk().raw(),
        );

        feed_watchdog::spawn().ok();

        defmt::info!("initialisation finished");

        (
            Shared {
                pool: SamplePool::new(),
            },
            Local {
                divider: RateDivider::new(TICK_DIVIDER),
                adc,
                adc_pin,
                tick_timer,
                radio,
                watchdog,
            },
            init::Monotonics(mono),
        )
    }

    /// Transmit consumer: poll for a completed frame and radio it out.
    /// The marker is cleared inside the lock, so a new frame can be
    /// published while the previous one is still going over the air.
    #[idle(shared = [pool], local = [radio])]
    fn idle(mut cx: idle::Context) -> ! {
        let mut frame = [0u8; FRAME_LEN];
        loop {
            let slot = cx.shared.pool.lock(|pool| pool.take(&mut frame));
            if let Some(slot) = slot {
                defmt::trace!("transmitting frame {}", slot);
                if cx.local.radio.send(&frame).is_err() {
                    defmt::error!("radio bus fault");
                }
            }
        }
    }

    /// Sampling producer. Runs on every hardware tick; reads the ADC
    /// only on accepted ticks.
    #[task(binds = TIM2, shared = [pool], local = [divider, adc, adc_pin, tick_timer])]
    fn sample_tick(mut cx: sample_tick::Context) {
        cx.local.tick_timer.clear_interrupt(Event::TimeOut);

        if !cx.local.divider.tick() {
            return;
        }

        // top 8 bits of the 12-bit conversion
        let raw: u16 = cx.local.adc.read(cx.local.adc_pin).unwrap_or_default();
        let sample = (raw >> 4) as u8;

        cx.shared.pool.lock(|pool| {
            if let Some(publication) = pool.push(sample) {
                if publication.overwrote {
                    defmt::warn!(
                        "frame {} replaced an unsent frame ({} dropped so far)",
                        publication.slot,
                        pool.dropped()
                    );
                } else {
                    defmt::trace!("frame {} ready", publication.slot);
                }
            }
        });
    }

    #[task(local = [watchdog])]
    fn feed_watchdog(cx: feed_watchdog::Context) {
        cx.local.watchdog.feed();
        feed_watchdog::spawn_after(80_u64.millis()).ok();
    }
}

// same panicking *behavior* as `panic-probe` but doesn't print a panic message
// this prevents the panic message being printed *twice* when `defmt::panic` is invoked
#[defmt::panic_handler]
fn panic() -> ! {
    cortex_m::asm::udf()
}

defmt::timestamp!("{=u64:us}", {
    app::monotonics::MonoTimer::now()
        .duration_since_epoch()
        .to_micros()
});
