//! Graph assembly: wraps each DSP component as a token-mode node and wires
//! the acyclic pipeline
//! source -> frames -> spectrum -> mel -> aggregator -> gates -> predictor
//! -> lighting -> publisher, with the gate logger teeing off the gate
//! vector and pool taps recording frame series for the snapshot.
//!
//! Components stay plain structs with `step` methods; only the thin
//! wrappers here know about ports and the scheduler.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::analysis::{
    FrameCutter, InstrumentAggregator, MelFilterBank, NoveltyGate, OnsetGate, QuantileGate,
    SpectrumAnalyzer,
};
use crate::audio::buffer_pool::DspChannels;
use crate::config::{AppConfig, GateMethod};
use crate::graph::{Graph, Node, Port, TickStatus};
use crate::instrument::{Instrument, NUM_INSTRUMENTS};
use crate::lighting::{LightingCommand, LightingEngine};
use crate::logger::HitLogger;
use crate::predict::{InstrumentPredictor, PredictionOutput};
use crate::publish::{EventPublisher, StartClock, Transport};
use crate::snapshot::FramePool;

type Energies = [f32; NUM_INSTRUMENTS];
type Gates = [f32; NUM_INSTRUMENTS];

/// Source node: drains hop buffers from the feeder queue.
struct HopSource {
    channels: DspChannels,
    out: Port<Vec<f32>>,
    stop: Arc<AtomicBool>,
}

impl Node for HopSource {
    fn name(&self) -> &'static str {
        "hop_source"
    }

    fn tick(&mut self, _frame_idx: u64) -> TickStatus {
        if !self.out.has_room() {
            return TickStatus::Idle;
        }
        match self.channels.data_consumer.pop() {
            Ok(buffer) => {
                self.out.push(buffer.clone()).ok();
                // Recycle the buffer for the feeder.
                let _ = self.channels.pool_producer.push(buffer);
                TickStatus::Produced
            }
            Err(_) => {
                if self.stop.load(Ordering::Relaxed) {
                    TickStatus::Finished
                } else {
                    TickStatus::Idle
                }
            }
        }
    }
}

/// Frame cutter node. Designated frame node: the scheduler's frame counter
/// advances exactly when this node emits a frame.
struct FrameNode {
    cutter: FrameCutter,
    input: Port<Vec<f32>>,
    out: Port<Vec<f32>>,
}

impl Node for FrameNode {
    fn name(&self) -> &'static str {
        "frame_cutter"
    }

    fn tick(&mut self, _frame_idx: u64) -> TickStatus {
        if !self.input.has_token() || !self.out.has_room() {
            return TickStatus::Idle;
        }
        let hop = self.input.pop().expect("checked above");
        match self.cutter.push_hop(&hop) {
            Some(frame) => {
                self.out.push(frame).ok();
                TickStatus::Produced
            }
            // Still priming; the consumed hop is progress but no frame yet.
            None => TickStatus::Idle,
        }
    }
}

struct SpectrumNode {
    analyzer: SpectrumAnalyzer,
    input: Port<Vec<f32>>,
    out: Port<Vec<f32>>,
}

impl Node for SpectrumNode {
    fn name(&self) -> &'static str {
        "spectrum"
    }

    fn tick(&mut self, _frame_idx: u64) -> TickStatus {
        if !self.input.has_token() || !self.out.has_room() {
            return TickStatus::Idle;
        }
        let frame = self.input.pop().expect("checked above");
        self.out.push(self.analyzer.process(&frame)).ok();
        TickStatus::Produced
    }
}

struct MelNode {
    bank: MelFilterBank,
    input: Port<Vec<f32>>,
    out: Port<Vec<f32>>,
}

impl Node for MelNode {
    fn name(&self) -> &'static str {
        "mel_bands"
    }

    fn tick(&mut self, _frame_idx: u64) -> TickStatus {
        if !self.input.has_token() || !self.out.has_room() {
            return TickStatus::Idle;
        }
        let spectrum = self.input.pop().expect("checked above");
        self.out.push(self.bank.apply(&spectrum)).ok();
        TickStatus::Produced
    }
}

struct AggregatorNode {
    aggregator: InstrumentAggregator,
    input: Port<Vec<f32>>,
    out: Port<Energies>,
    pool: Rc<RefCell<FramePool>>,
}

impl Node for AggregatorNode {
    fn name(&self) -> &'static str {
        "instrument_aggregator"
    }

    fn tick(&mut self, _frame_idx: u64) -> TickStatus {
        if !self.input.has_token() || !self.out.has_room() {
            return TickStatus::Idle;
        }
        let bands = self.input.pop().expect("checked above");
        let energies = self.aggregator.step(&bands);

        let mut pool = self.pool.borrow_mut();
        for instrument in Instrument::ALL {
            pool.add(
                &format!("instrument.{}.sum", instrument.name()),
                energies[instrument.index()],
            );
        }
        drop(pool);

        self.out.push(energies).ok();
        TickStatus::Produced
    }
}

/// The five per-channel gates, stepped together on the energy vector.
struct GateBankNode {
    gates: Vec<Box<dyn NoveltyGate>>,
    input: Port<Energies>,
    to_predictor: Port<Gates>,
    to_logger: Port<Gates>,
    pool: Rc<RefCell<FramePool>>,
}

impl Node for GateBankNode {
    fn name(&self) -> &'static str {
        "gate_bank"
    }

    fn tick(&mut self, _frame_idx: u64) -> TickStatus {
        if !self.input.has_token()
            || !self.to_predictor.has_room()
            || !self.to_logger.has_room()
        {
            return TickStatus::Idle;
        }
        let energies = self.input.pop().expect("checked above");

        let mut gates = [0.0f32; NUM_INSTRUMENTS];
        for (i, gate) in self.gates.iter_mut().enumerate() {
            gates[i] = gate.step(energies[i]);
        }

        let mut pool = self.pool.borrow_mut();
        for instrument in Instrument::ALL {
            pool.add(
                &format!("gate.{}", instrument.name()),
                gates[instrument.index()],
            );
        }
        drop(pool);

        self.to_predictor.push(gates).ok();
        self.to_logger.push(gates).ok();
        TickStatus::Produced
    }
}

/// Sink: writes gate firings to the hit logger, stamped with the
/// scheduler's frame counter.
struct GateLogNode {
    input: Port<Gates>,
    logger: Arc<HitLogger>,
}

impl Node for GateLogNode {
    fn name(&self) -> &'static str {
        "gate_logger"
    }

    fn tick(&mut self, frame_idx: u64) -> TickStatus {
        let Some(gates) = self.input.pop() else {
            return TickStatus::Idle;
        };
        for instrument in Instrument::ALL {
            self.logger
                .log_gate_value(instrument, gates[instrument.index()], frame_idx);
        }
        TickStatus::Produced
    }
}

/// Predictor node: always consumes the gate vector; emits a snapshot token
/// on hits or the periodic heartbeat, logging and publishing telemetry as
/// a side channel.
struct PredictorNode {
    predictor: InstrumentPredictor,
    input: Port<Gates>,
    out: Port<PredictionOutput>,
    logger: Arc<HitLogger>,
    telemetry: Option<Box<dyn Transport>>,
}

impl Node for PredictorNode {
    fn name(&self) -> &'static str {
        "instrument_predictor"
    }

    fn tick(&mut self, frame_idx: u64) -> TickStatus {
        if !self.input.has_token() || !self.out.has_room() {
            return TickStatus::Idle;
        }
        let gates = self.input.pop().expect("checked above");

        let Some(snapshot) = self.predictor.step(&gates, frame_idx) else {
            return TickStatus::Produced;
        };

        if self.logger.is_enabled() {
            let per_channel: Vec<(Instrument, &[crate::predict::PredictionHit])> = snapshot
                .predictions
                .iter()
                .map(|p| (p.instrument, p.hits.as_slice()))
                .collect();
            self.logger
                .log_predictions(frame_idx, snapshot.timestamp_sec, &per_channel);
        }

        if let Some(transport) = self.telemetry.as_mut() {
            match serde_json::to_vec(&snapshot) {
                Ok(payload) => transport.publish(&payload),
                Err(err) => log::error!("[Predictor] telemetry serialize failed: {}", err),
            }
        }

        self.out.push(snapshot).ok();
        TickStatus::Produced
    }
}

struct LightingNode {
    engine: LightingEngine,
    input: Port<PredictionOutput>,
    out: Port<Vec<LightingCommand>>,
}

impl Node for LightingNode {
    fn name(&self) -> &'static str {
        "lighting_engine"
    }

    fn tick(&mut self, _frame_idx: u64) -> TickStatus {
        if !self.input.has_token() || !self.out.has_room() {
            return TickStatus::Idle;
        }
        let snapshot = self.input.pop().expect("checked above");
        let commands = self.engine.step(&snapshot);
        if !commands.is_empty() {
            self.out.push(commands).ok();
        }
        TickStatus::Produced
    }
}

/// Sink: converts commands to wall-clock events and publishes them.
struct PublisherNode {
    publisher: EventPublisher,
    input: Port<Vec<LightingCommand>>,
}

impl Node for PublisherNode {
    fn name(&self) -> &'static str {
        "event_publisher"
    }

    fn tick(&mut self, _frame_idx: u64) -> TickStatus {
        let Some(commands) = self.input.pop() else {
            return TickStatus::Idle;
        };
        for command in &commands {
            self.publisher.publish_command(command);
        }
        TickStatus::Produced
    }
}

fn build_gate(config: &crate::config::GateConfig) -> Box<dyn NoveltyGate> {
    match config.method {
        GateMethod::Quantile => Box::new(QuantileGate::new(config)),
        _ => Box::new(OnsetGate::new(config)),
    }
}

/// The assembled graph plus the shared frame pool tap.
pub struct BuiltGraph {
    pub graph: Graph,
    pub pool: Rc<RefCell<FramePool>>,
}

/// Wire the full pipeline. `sample_rate` is the rate the capture device
/// actually opened with; transports may be None to disable the
/// corresponding outbound stream.
pub fn build_graph(
    config: &AppConfig,
    sample_rate: f32,
    dsp_channels: DspChannels,
    stop: Arc<AtomicBool>,
    logger: Arc<HitLogger>,
    clock: StartClock,
    event_transport: Option<Box<dyn Transport>>,
    telemetry_transport: Option<Box<dyn Transport>>,
) -> BuiltGraph {
    let pool = Rc::new(RefCell::new(FramePool::new()));

    let hops: Port<Vec<f32>> = Port::new();
    let frames: Port<Vec<f32>> = Port::new();
    let spectra: Port<Vec<f32>> = Port::new();
    let bands: Port<Vec<f32>> = Port::new();
    let energies: Port<Energies> = Port::new();
    let gates_pred: Port<Gates> = Port::new();
    let gates_log: Port<Gates> = Port::new();
    let snapshots: Port<PredictionOutput> = Port::new();
    let commands: Port<Vec<LightingCommand>> = Port::new();

    let mut graph = Graph::new();

    graph.add(Box::new(HopSource {
        channels: dsp_channels,
        out: hops.clone(),
        stop,
    }));

    let frame_node = graph.add(Box::new(FrameNode {
        cutter: FrameCutter::new(config.audio.frame_size, config.audio.hop_size),
        input: hops,
        out: frames.clone(),
    }));
    graph.set_frame_node(frame_node);

    graph.add(Box::new(SpectrumNode {
        analyzer: SpectrumAnalyzer::new(config.audio.frame_size),
        input: frames,
        out: spectra.clone(),
    }));

    graph.add(Box::new(MelNode {
        bank: MelFilterBank::new(config.audio.mel_bands, config.audio.frame_size, sample_rate),
        input: spectra,
        out: bands.clone(),
    }));

    graph.add(Box::new(AggregatorNode {
        aggregator: InstrumentAggregator::new(sample_rate, config.aggregator.lobe_rolloff),
        input: bands,
        out: energies.clone(),
        pool: Rc::clone(&pool),
    }));

    graph.add(Box::new(GateBankNode {
        gates: config
            .gates
            .per_channel()
            .into_iter()
            .map(build_gate)
            .collect(),
        input: energies,
        to_predictor: gates_pred.clone(),
        to_logger: gates_log.clone(),
        pool: Rc::clone(&pool),
    }));

    graph.add(Box::new(GateLogNode {
        input: gates_log,
        logger: Arc::clone(&logger),
    }));

    graph.add(Box::new(PredictorNode {
        predictor: InstrumentPredictor::new(
            config.predictor.clone(),
            sample_rate,
            config.audio.hop_size,
        ),
        input: gates_pred,
        out: snapshots.clone(),
        logger,
        telemetry: telemetry_transport,
    }));

    graph.add(Box::new(LightingNode {
        engine: LightingEngine::new(config.lighting.clone()),
        input: snapshots,
        out: commands.clone(),
    }));

    // The command sink always exists so the port drains even when
    // publishing is disabled.
    let transport =
        event_transport.unwrap_or_else(|| Box::new(crate::publish::NullTransport));
    graph.add(Box::new(PublisherNode {
        publisher: EventPublisher::new(clock, transport),
        input: commands,
    }));

    BuiltGraph { graph, pool }
}
