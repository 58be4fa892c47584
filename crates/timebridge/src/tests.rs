//! Unit tests for the transactors

use std::sync::{Arc, Mutex};
use std::time::Duration;

use test_case::test_case;
use timebridge_com::promise::{self, Promise};
use timebridge_com::{CallError, Completion, EventDispatcher, LoopbackEvent, LoopbackMethod, ProxyEvent};
use timebridge_reactor::testing::{Recorder, Source};
use timebridge_reactor::{Environment, EnvironmentBuilder, LogicalTime, ManualClock, ReactorHandle};

use crate::transactor::{EventSink, EventSource, MethodTarget};
use crate::{
    CorrelationPolicy, DeliveryOrdering, EvictionPolicy, ProxyEventOptions, ProxyEventTransactor,
    ProxyMethodTransactor, Reply, Request, RequestGateway, RequestId, SkeletonEventTransactor,
    SkeletonMethodOptions, SkeletonMethodTransactor, Stamped, TimestampContext, TimingBudget,
};

fn ms(millis: i64) -> LogicalTime {
    LogicalTime::from_millis(millis)
}

/// request_deadline 2ms, lookahead 5ms + 1ms.
fn budget() -> TimingBudget {
    TimingBudget::new(
        Duration::from_millis(2),
        Duration::from_millis(5),
        Duration::from_millis(1),
    )
    .unwrap()
}

fn builder() -> (EnvironmentBuilder, ManualClock) {
    crate::telemetry::init_for_tests();
    let clock = ManualClock::new(ms(0));
    let builder = EnvironmentBuilder::new(clock.clone()).with_start_time(ms(0));
    (builder, clock)
}

// ============================================================================
// ProxyEventTransactor
// ============================================================================

struct EventRig {
    env: Environment,
    clock: ManualClock,
    event: LoopbackEvent<Stamped<u32>>,
    transactor: ReactorHandle<ProxyEventTransactor<u32>>,
    recorder: ReactorHandle<Recorder<u32>>,
}

impl EventRig {
    fn new(ordering: DeliveryOrdering) -> Self {
        let (mut builder, clock) = builder();
        let event = LoopbackEvent::<Stamped<u32>>::new();
        let source: EventSource<u32> = Arc::new(event.proxy());
        let options = ProxyEventOptions {
            budget: budget(),
            ordering,
            ..ProxyEventOptions::default()
        };

        let transactor = builder
            .add("brake_status", |asm| ProxyEventTransactor::new(asm, Some(source), options))
            .unwrap();
        let recorder = builder.add("sink", Recorder::<u32>::new).unwrap();
        let notify = builder.reactor(&transactor).unwrap().notify();
        let input = builder.reactor(&recorder).unwrap().input();
        builder.connect(&notify, &input).unwrap();

        let mut env = builder.build().unwrap();
        env.step();
        Self {
            env,
            clock,
            event,
            transactor,
            recorder,
        }
    }

    fn recorded(&self) -> Vec<(LogicalTime, u32)> {
        let recorder = self.env.reactor(&self.recorder).unwrap();
        recorder.times().into_iter().zip(recorder.values()).collect()
    }

    fn transactor(&self) -> &ProxyEventTransactor<u32> {
        self.env.reactor(&self.transactor).unwrap()
    }
}

#[test]
fn event_is_delivered_at_stamp_plus_lookahead() {
    let mut rig = EventRig::new(DeliveryOrdering::Monotonic);
    rig.clock.set(ms(100));
    rig.event.send(Stamped::new(7, ms(100)));

    rig.env.run_until(ms(105));
    assert!(rig.recorded().is_empty(), "never delivered early");

    rig.env.run_until_idle();
    assert_eq!(rig.recorded(), vec![(ms(106), 7)]);
    assert_eq!(rig.transactor().stats().delivered, 1);
    assert_eq!(rig.transactor().stats().timing_violations, 0);
}

#[test]
fn late_event_is_dropped_with_one_violation() {
    let mut rig = EventRig::new(DeliveryOrdering::Monotonic);
    rig.clock.set(ms(110));
    rig.event.send(Stamped::new(7, ms(100)));
    rig.env.run_until_idle();

    assert!(rig.recorded().is_empty());
    assert_eq!(rig.transactor().stats().timing_violations, 1);
}

#[test]
fn event_due_exactly_now_is_late() {
    let mut rig = EventRig::new(DeliveryOrdering::Monotonic);
    rig.clock.set(ms(106));
    rig.event.send(Stamped::new(7, ms(100)));
    rig.env.run_until_idle();

    assert!(rig.recorded().is_empty());
    assert_eq!(rig.transactor().stats().timing_violations, 1);
}

#[test_case(DeliveryOrdering::Monotonic, vec![(ms(108), 1), (ms(108), 2)]; "monotonic keeps arrival order")]
#[test_case(DeliveryOrdering::Independent, vec![(ms(106), 2), (ms(108), 1)]; "independent follows stamps")]
fn batch_with_decreasing_stamps(ordering: DeliveryOrdering, expected: Vec<(LogicalTime, u32)>) {
    let mut rig = EventRig::new(ordering);
    rig.clock.set(ms(100));
    rig.event.send(Stamped::new(1, ms(102)));
    rig.event.send(Stamped::new(2, ms(100)));
    rig.env.run_until_idle();

    assert_eq!(rig.recorded(), expected);
}

#[test]
fn monotonic_clamp_does_not_carry_across_batches() {
    let mut rig = EventRig::new(DeliveryOrdering::Monotonic);
    rig.clock.set(ms(100));
    rig.event.send(Stamped::new(1, ms(1000)));
    rig.env.run_until(ms(101));

    rig.clock.set(ms(102));
    rig.event.send(Stamped::new(2, ms(101)));
    rig.env.run_until_idle();

    assert_eq!(rig.recorded(), vec![(ms(107), 2), (ms(1006), 1)]);
    assert_eq!(rig.transactor().stats().timing_violations, 0);
}

#[test]
#[should_panic(expected = "message carries no timestamp")]
fn unstamped_sample_is_a_contract_violation() {
    let mut rig = EventRig::new(DeliveryOrdering::Monotonic);
    rig.event.send(Stamped::unstamped(1));
    rig.env.run_until_idle();
}

#[test]
fn rebinding_keeps_scheduled_deliveries() {
    let (mut builder, clock) = builder();
    let first = LoopbackEvent::<Stamped<u32>>::new();
    let second = LoopbackEvent::<Stamped<u32>>::new();
    let first_proxy = Arc::new(first.proxy());
    let second_proxy = Arc::new(second.proxy());
    let initial: EventSource<u32> = first_proxy.clone();
    let replacement: EventSource<u32> = second_proxy.clone();
    let options = ProxyEventOptions {
        budget: budget(),
        ..ProxyEventOptions::default()
    };

    let transactor = builder
        .add("status", |asm| ProxyEventTransactor::new(asm, Some(initial), options))
        .unwrap();
    let switch = builder
        .add("switch", |asm| Source::new(asm, vec![(ms(103), Some(replacement))]))
        .unwrap();
    let recorder = builder.add("sink", Recorder::<u32>::new).unwrap();
    let (notify, rebind) = {
        let t = builder.reactor(&transactor).unwrap();
        (t.notify(), t.rebind())
    };
    let switch_out = builder.reactor(&switch).unwrap().output();
    let input = builder.reactor(&recorder).unwrap().input();
    builder.connect(&notify, &input).unwrap();
    builder.connect(&switch_out, &rebind).unwrap();

    let mut env = builder.build().unwrap();
    env.step();
    assert!(first_proxy.is_subscribed());
    assert!(first_proxy.has_receive_handler());

    clock.set(ms(100));
    first.send(Stamped::new(1, ms(100)));
    env.run_until_idle();

    assert_eq!(env.reactor(&recorder).unwrap().times(), vec![ms(106)]);
    assert!(!first_proxy.is_subscribed());
    assert!(!first_proxy.has_receive_handler());
    assert!(second_proxy.is_subscribed());

    clock.set(ms(120));
    first.send(Stamped::new(2, ms(120)));
    second.send(Stamped::new(3, ms(120)));
    env.run_until_idle();

    assert_eq!(env.reactor(&recorder).unwrap().values(), vec![1, 3]);
    assert_eq!(env.reactor(&recorder).unwrap().times(), vec![ms(106), ms(126)]);
}

// ============================================================================
// SkeletonEventTransactor
// ============================================================================

/// Records the envelope and the staged context of every sample it is sent.
#[derive(Default)]
struct ContextLog {
    seen: Mutex<Vec<(Stamped<u32>, Option<LogicalTime>)>>,
}

impl EventDispatcher for ContextLog {
    type Sample = Stamped<u32>;

    fn send(&self, sample: Stamped<u32>) {
        let staged = TimestampContext::retrieve();
        self.seen.lock().unwrap().push((sample, staged));
    }
}

fn skeleton_event_env(
    sink: Option<EventSink<u32>>,
    emit_at: LogicalTime,
) -> (Environment, ManualClock, ReactorHandle<SkeletonEventTransactor<u32>>) {
    let (mut builder, clock) = builder();
    let transactor = builder
        .add("publisher", |asm| {
            SkeletonEventTransactor::new(asm, sink, Duration::from_millis(2))
        })
        .unwrap();
    let source = builder
        .add("values", |asm| Source::new(asm, vec![(emit_at, 9u32)]))
        .unwrap();
    let out = builder.reactor(&source).unwrap().output();
    let notify = builder.reactor(&transactor).unwrap().notify();
    builder.connect(&out, &notify).unwrap();
    (builder.build().unwrap(), clock, transactor)
}

#[test]
fn skeleton_event_stamps_envelope_and_context() {
    let log = Arc::new(ContextLog::default());
    let sink: EventSink<u32> = log.clone();
    let (mut env, clock, transactor) = skeleton_event_env(Some(sink), ms(50));
    clock.set(ms(50));
    env.run_until_idle();

    let seen = log.seen.lock().unwrap();
    assert_eq!(seen.as_slice(), &[(Stamped::new(9, ms(52)), Some(ms(52)))]);
    assert_eq!(TimestampContext::retrieve(), None);
    let stats = env.reactor(&transactor).unwrap().stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.deadline_misses, 0);
}

#[test]
fn skeleton_event_reaches_loopback_proxy() {
    let event = LoopbackEvent::<Stamped<u32>>::new();
    let proxy = event.proxy();
    proxy.subscribe(timebridge_com::CacheUpdatePolicy::NewestN, 4);
    let sink: EventSink<u32> = Arc::new(event.clone());
    let (mut env, _clock, _transactor) = skeleton_event_env(Some(sink), ms(20));
    env.run_until_idle();

    proxy.update();
    assert_eq!(proxy.cached_samples(), vec![Stamped::new(9, ms(22))]);
}

#[test]
fn skeleton_event_unbound_drops() {
    let (mut env, _clock, transactor) = skeleton_event_env(None, ms(20));
    env.run_until_idle();
    assert_eq!(env.reactor(&transactor).unwrap().stats().unbound_drops, 1);
}

#[test]
fn skeleton_event_rebinding_switches_sinks() {
    let first = Arc::new(ContextLog::default());
    let second = Arc::new(ContextLog::default());
    let initial: EventSink<u32> = first.clone();
    let replacement: EventSink<u32> = second.clone();

    let (mut builder, _clock) = builder();
    let transactor = builder
        .add("publisher", |asm| {
            SkeletonEventTransactor::new(asm, Some(initial), Duration::from_millis(2))
        })
        .unwrap();
    let values = builder
        .add("values", |asm| Source::new(asm, vec![(ms(10), 1u32), (ms(30), 2), (ms(50), 3)]))
        .unwrap();
    let switch = builder
        .add("switch", |asm| Source::new(asm, vec![(ms(20), None), (ms(40), Some(replacement))]))
        .unwrap();
    let (notify, rebind) = {
        let t = builder.reactor(&transactor).unwrap();
        (t.notify(), t.rebind())
    };
    let values_out = builder.reactor(&values).unwrap().output();
    let switch_out = builder.reactor(&switch).unwrap().output();
    builder.connect(&values_out, &notify).unwrap();
    builder.connect(&switch_out, &rebind).unwrap();
    let mut env = builder.build().unwrap();
    env.run_until_idle();

    let firsts: Vec<Stamped<u32>> = first.seen.lock().unwrap().iter().map(|(sample, _)| sample.clone()).collect();
    let seconds: Vec<Stamped<u32>> = second.seen.lock().unwrap().iter().map(|(sample, _)| sample.clone()).collect();
    assert_eq!(firsts, vec![Stamped::new(1, ms(12))]);
    assert_eq!(seconds, vec![Stamped::new(3, ms(52))]);
    let stats = env.reactor(&transactor).unwrap().stats();
    assert_eq!(stats.unbound_drops, 1);
    assert_eq!(stats.delivered, 2);
}

#[test]
fn skeleton_event_deadline_miss_is_observational() {
    let log = Arc::new(ContextLog::default());
    let sink: EventSink<u32> = log.clone();
    let (mut env, clock, transactor) = skeleton_event_env(Some(sink), ms(50));
    clock.set(ms(100));
    env.run_until_idle();

    let stats = env.reactor(&transactor).unwrap().stats();
    assert_eq!(stats.deadline_misses, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(log.seen.lock().unwrap().len(), 1);
}

// ============================================================================
// ProxyMethodTransactor
// ============================================================================

struct CallRig {
    env: Environment,
    clock: ManualClock,
    transactor: ReactorHandle<ProxyMethodTransactor<u32, u32>>,
    responses: ReactorHandle<Recorder<u32>>,
}

impl CallRig {
    fn new(method: Option<MethodTarget<u32, u32>>, requests: Vec<(LogicalTime, u32)>) -> Self {
        Self::with_rebinds(method, requests, Vec::new())
    }

    fn with_rebinds(
        method: Option<MethodTarget<u32, u32>>,
        requests: Vec<(LogicalTime, u32)>,
        rebinds: Vec<(LogicalTime, Option<MethodTarget<u32, u32>>)>,
    ) -> Self {
        let (mut builder, clock) = builder();
        let transactor = builder
            .add("brake_cmd", |asm| ProxyMethodTransactor::new(asm, method, budget()))
            .unwrap();
        let source = builder.add("requests", |asm| Source::new(asm, requests)).unwrap();
        let switch = builder.add("switch", |asm| Source::new(asm, rebinds)).unwrap();
        let responses = builder.add("responses", Recorder::<u32>::new).unwrap();

        let (request, response, rebind) = {
            let t = builder.reactor(&transactor).unwrap();
            (t.request(), t.response(), t.rebind())
        };
        let out = builder.reactor(&source).unwrap().output();
        let switch_out = builder.reactor(&switch).unwrap().output();
        let input = builder.reactor(&responses).unwrap().input();
        builder.connect(&out, &request).unwrap();
        builder.connect(&switch_out, &rebind).unwrap();
        builder.connect(&response, &input).unwrap();

        Self {
            env: builder.build().unwrap(),
            clock,
            transactor,
            responses,
        }
    }

    fn recorded(&self) -> Vec<(LogicalTime, u32)> {
        let recorder = self.env.reactor(&self.responses).unwrap();
        recorder.times().into_iter().zip(recorder.values()).collect()
    }

    fn transactor(&self) -> &ProxyMethodTransactor<u32, u32> {
        self.env.reactor(&self.transactor).unwrap()
    }
}

/// Echoes the request deadline back as the response timestamp.
fn doubling_method() -> Arc<LoopbackMethod<Stamped<u32>, Stamped<u32>>> {
    Arc::new(LoopbackMethod::serve(|request: Stamped<u32>| {
        Completion::ready(Ok(request.map(|value| value * 2)))
    }))
}

#[test]
fn response_is_delivered_after_lookahead() {
    let method = doubling_method();
    let target: MethodTarget<u32, u32> = method.clone();
    let mut rig = CallRig::new(Some(target), vec![(ms(10), 21)]);
    rig.env.run_until_idle();

    // Request stamped 10 + 2; response admitted at 12 + 6.
    assert_eq!(rig.recorded(), vec![(ms(18), 42)]);
    assert_eq!(method.calls(), 1);
    assert_eq!(rig.transactor().in_flight(), 0);
}

#[test]
fn request_carries_deadline_in_envelope_and_context() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let method: MethodTarget<u32, u32> = Arc::new(LoopbackMethod::serve(move |request: Stamped<u32>| {
        log.lock().unwrap().push((request.timestamp, TimestampContext::retrieve()));
        Completion::ready(Ok(request))
    }));
    let mut rig = CallRig::new(Some(method), vec![(ms(30), 1)]);
    rig.env.run_until_idle();

    assert_eq!(*seen.lock().unwrap(), vec![(Some(ms(32)), Some(ms(32)))]);
    assert_eq!(TimestampContext::retrieve(), None);
}

#[test]
fn unbound_request_gets_no_response() {
    let mut rig = CallRig::new(None, vec![(ms(10), 1)]);
    rig.env.run_until_idle();

    assert!(rig.recorded().is_empty());
    assert_eq!(rig.transactor().stats().unbound_drops, 1);
    assert_eq!(rig.transactor().in_flight(), 0);
}

#[test]
fn unbound_request_is_not_replayed_after_rebind() {
    let method = doubling_method();
    let target: MethodTarget<u32, u32> = method.clone();
    let mut rig = CallRig::with_rebinds(None, vec![(ms(10), 1), (ms(30), 2)], vec![(ms(20), Some(target))]);

    rig.env.run_until(ms(25));
    assert_eq!(rig.transactor().stats().unbound_drops, 1);
    assert_eq!(method.calls(), 0);

    rig.env.run_until_idle();
    assert_eq!(method.calls(), 1);
    assert_eq!(rig.recorded(), vec![(ms(38), 4)]);
    assert_eq!(rig.transactor().stats().unbound_drops, 1);
}

#[test]
fn rebinding_to_none_drops_later_requests() {
    let method = doubling_method();
    let target: MethodTarget<u32, u32> = method.clone();
    let mut rig = CallRig::with_rebinds(Some(target), vec![(ms(10), 1), (ms(30), 2)], vec![(ms(20), None)]);
    rig.env.run_until_idle();

    assert_eq!(rig.recorded(), vec![(ms(18), 2)]);
    assert_eq!(method.calls(), 1);
    assert_eq!(rig.transactor().stats().unbound_drops, 1);
    assert_eq!(rig.transactor().in_flight(), 0);
}

#[test]
fn failed_call_is_dropped() {
    let method: MethodTarget<u32, u32> = Arc::new(LoopbackMethod::<Stamped<u32>, Stamped<u32>>::unavailable());
    let mut rig = CallRig::new(Some(method), vec![(ms(10), 1)]);
    rig.env.run_until_idle();

    assert!(rig.recorded().is_empty());
    assert_eq!(rig.transactor().stats().call_errors, 1);
    assert_eq!(rig.transactor().in_flight(), 0);
}

#[test]
fn late_response_is_dropped() {
    let method: MethodTarget<u32, u32> = Arc::new(LoopbackMethod::serve(|request: Stamped<u32>| {
        Completion::ready(Ok(Stamped::new(request.value, ms(0))))
    }));
    let mut rig = CallRig::new(Some(method), vec![(ms(10), 1)]);
    rig.env.run_until_idle();

    assert!(rig.recorded().is_empty());
    assert_eq!(rig.transactor().stats().timing_violations, 1);
}

#[test]
#[should_panic(expected = "message carries no timestamp")]
fn unstamped_response_is_a_contract_violation() {
    let method: MethodTarget<u32, u32> = Arc::new(LoopbackMethod::serve(|request: Stamped<u32>| {
        Completion::ready(Ok(Stamped::unstamped(request.value)))
    }));
    let mut rig = CallRig::new(Some(method), vec![(ms(10), 1)]);
    rig.env.run_until_idle();
}

#[test]
fn response_completed_later_from_another_thread() {
    let parked: Arc<Mutex<Vec<(u32, Promise<Stamped<u32>>)>>> = Arc::default();
    let park = Arc::clone(&parked);
    let method: MethodTarget<u32, u32> = Arc::new(LoopbackMethod::serve(move |request: Stamped<u32>| {
        let (promise, completion) = promise::channel();
        park.lock().unwrap().push((request.value, promise));
        completion
    }));
    let mut rig = CallRig::new(Some(method), vec![(ms(10), 5)]);
    rig.env.run_until_idle();
    assert_eq!(rig.transactor().in_flight(), 1);

    rig.clock.set(ms(40));
    let (value, promise) = parked.lock().unwrap().pop().unwrap();
    std::thread::spawn(move || promise.set_value(Stamped::new(value + 1, ms(39))))
        .join()
        .unwrap();
    rig.env.run_until_idle();

    assert_eq!(rig.recorded(), vec![(ms(45), 6)]);
    assert_eq!(rig.transactor().in_flight(), 0);
}

#[test]
fn in_flight_response_survives_rebind() {
    let parked: Arc<Mutex<Vec<(u32, Promise<Stamped<u32>>)>>> = Arc::default();
    let park = Arc::clone(&parked);
    let old: MethodTarget<u32, u32> = Arc::new(LoopbackMethod::serve(move |request: Stamped<u32>| {
        let (promise, completion) = promise::channel();
        park.lock().unwrap().push((request.value, promise));
        completion
    }));
    let replacement = doubling_method();
    let rebound: MethodTarget<u32, u32> = replacement.clone();
    let mut rig = CallRig::with_rebinds(Some(old), vec![(ms(10), 5)], vec![(ms(20), Some(rebound))]);
    rig.env.run_until_idle();
    assert_eq!(rig.transactor().in_flight(), 1);

    rig.clock.set(ms(40));
    let (value, promise) = parked.lock().unwrap().pop().unwrap();
    promise.set_value(Stamped::new(value + 1, ms(39)));
    rig.env.run_until_idle();

    assert_eq!(rig.recorded(), vec![(ms(45), 6)]);
    assert_eq!(replacement.calls(), 0);
    assert_eq!(rig.transactor().in_flight(), 0);
}

// ============================================================================
// SkeletonMethodTransactor
// ============================================================================

struct ServeRig {
    env: Environment,
    clock: ManualClock,
    transactor: ReactorHandle<SkeletonMethodTransactor<u32, u32>>,
    requests: ReactorHandle<Recorder<Request<u32>>>,
    gateway: RequestGateway<u32, u32>,
}

impl ServeRig {
    /// The local service is played by a script of replies.
    fn new(options: SkeletonMethodOptions, replies: Vec<(LogicalTime, Reply<u32>)>) -> Self {
        let (mut builder, clock) = builder();
        let transactor = builder
            .add("brake_service", |asm| SkeletonMethodTransactor::new(asm, options))
            .unwrap();
        let service = builder.add("service", |asm| Source::new(asm, replies)).unwrap();
        let requests = builder.add("requests", Recorder::<Request<u32>>::new).unwrap();

        let (request, reply, gateway) = {
            let t = builder.reactor(&transactor).unwrap();
            (t.request(), t.reply(), t.gateway())
        };
        let out = builder.reactor(&service).unwrap().output();
        let input = builder.reactor(&requests).unwrap().input();
        builder.connect(&request, &input).unwrap();
        builder.connect(&out, &reply).unwrap();

        let mut env = builder.build().unwrap();
        env.step();
        Self {
            env,
            clock,
            transactor,
            requests,
            gateway,
        }
    }

    fn submit(&self, arrival: LogicalTime, args: u32) -> Completion<Stamped<u32>> {
        self.clock.set(arrival);
        self.gateway.process_stamped(Stamped::new(args, arrival))
    }

    fn transactor(&self) -> &SkeletonMethodTransactor<u32, u32> {
        self.env.reactor(&self.transactor).unwrap()
    }
}

fn serve_options(correlation: CorrelationPolicy, eviction: EvictionPolicy) -> SkeletonMethodOptions {
    SkeletonMethodOptions {
        budget: budget(),
        correlation,
        eviction,
        pending_timeout: None,
    }
}

fn reply(id: u64, value: u32) -> Reply<u32> {
    Reply {
        request: RequestId::new(id),
        value,
    }
}

#[test]
fn response_is_stamped_with_response_deadline() {
    let options = serve_options(CorrelationPolicy::ByRequestId, EvictionPolicy::FailFast);
    let mut rig = ServeRig::new(options, vec![(ms(50), reply(0, 99))]);

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    rig.submit(ms(40), 3).then(move |result| {
        *sink.lock().unwrap() = Some((result, TimestampContext::retrieve()));
    });
    rig.env.run_until_idle();

    let requests = rig.env.reactor(&rig.requests).unwrap();
    assert_eq!(requests.times(), vec![ms(46)]);
    assert_eq!(requests.values()[0].args, 3);
    assert_eq!(
        seen.lock().unwrap().take(),
        Some((Ok(Stamped::new(99, ms(52))), Some(ms(52))))
    );
    assert_eq!(TimestampContext::retrieve(), None);
    assert_eq!(rig.transactor().pending(), 0);
}

#[test]
fn process_request_reads_staged_timestamp() {
    let options = serve_options(CorrelationPolicy::ByRequestId, EvictionPolicy::FailFast);
    let mut rig = ServeRig::new(options, vec![(ms(50), reply(0, 1))]);
    rig.clock.set(ms(40));

    let completion = TimestampContext::scoped(ms(40), || rig.gateway.process_request(8));
    rig.env.run_until_idle();

    assert_eq!(completion.wait(), Ok(Stamped::new(1, ms(52))));
}

#[test]
#[should_panic(expected = "message carries no timestamp")]
fn process_request_without_timestamp_panics() {
    let options = serve_options(CorrelationPolicy::ByRequestId, EvictionPolicy::FailFast);
    let rig = ServeRig::new(options, Vec::new());
    let _ = rig.gateway.process_request(8);
}

#[test]
fn arrival_order_resolves_oldest_first() {
    let options = serve_options(CorrelationPolicy::ArrivalOrder, EvictionPolicy::FailFast);
    // Ids in the replies are ignored under arrival-order correlation.
    let mut rig = ServeRig::new(options, vec![(ms(30), reply(7, 100)), (ms(31), reply(7, 200))]);
    let first = rig.submit(ms(10), 1);
    let second = rig.submit(ms(12), 2);
    rig.env.run_until_idle();

    assert_eq!(first.wait().map(|r| r.value), Ok(100));
    assert_eq!(second.wait().map(|r| r.value), Ok(200));
}

#[test]
fn request_id_correlation_survives_reordering() {
    let options = serve_options(CorrelationPolicy::ByRequestId, EvictionPolicy::FailFast);
    let mut rig = ServeRig::new(options, vec![(ms(30), reply(1, 200)), (ms(31), reply(0, 100))]);
    let first = rig.submit(ms(10), 1);
    let second = rig.submit(ms(12), 2);
    rig.env.run_until_idle();

    let ids: Vec<RequestId> = rig
        .env
        .reactor(&rig.requests)
        .unwrap()
        .values()
        .iter()
        .map(|request| request.id)
        .collect();
    assert_eq!(ids, vec![RequestId::new(0), RequestId::new(1)]);
    assert_eq!(first.wait(), Ok(Stamped::new(100, ms(33))));
    assert_eq!(second.wait(), Ok(Stamped::new(200, ms(32))));
}

#[test]
#[should_panic(expected = "already pending")]
fn duplicate_arrival_under_arrival_order_panics() {
    let options = serve_options(CorrelationPolicy::ArrivalOrder, EvictionPolicy::FailFast);
    let mut rig = ServeRig::new(options, Vec::new());
    let _first = rig.submit(ms(10), 1);
    let _second = rig.submit(ms(10), 2);
    rig.env.run_until_idle();
}

#[test]
fn duplicate_arrival_is_fine_by_request_id() {
    let options = serve_options(CorrelationPolicy::ByRequestId, EvictionPolicy::FailFast);
    let mut rig = ServeRig::new(options, Vec::new());
    let _first = rig.submit(ms(10), 1);
    let _second = rig.submit(ms(10), 2);
    rig.env.run_until_idle();
    assert_eq!(rig.transactor().pending(), 2);
}

#[test]
fn fail_fast_evicts_late_request() {
    let options = serve_options(CorrelationPolicy::ByRequestId, EvictionPolicy::FailFast);
    let mut rig = ServeRig::new(options, Vec::new());
    rig.clock.set(ms(100));
    let completion = rig.gateway.process_stamped(Stamped::new(1, ms(50)));
    rig.env.run_until_idle();

    assert_eq!(completion.wait(), Err(CallError::TimingViolation));
    assert_eq!(rig.transactor().pending(), 0);
    assert!(rig.env.reactor(&rig.requests).unwrap().is_empty());
    let stats = rig.transactor().stats();
    assert_eq!(stats.timing_violations, 1);
    assert_eq!(stats.evicted, 1);
}

#[test]
fn retain_keeps_late_request_pending() {
    let options = serve_options(CorrelationPolicy::ByRequestId, EvictionPolicy::Retain);
    let mut rig = ServeRig::new(options, vec![(ms(200), reply(0, 5))]);
    rig.clock.set(ms(100));
    let mut completion = rig.gateway.process_stamped(Stamped::new(1, ms(50)));
    rig.env.run_until(ms(150));

    assert!(completion.try_take().is_none());
    assert_eq!(rig.transactor().pending(), 1);
    assert!(rig.env.reactor(&rig.requests).unwrap().is_empty());

    rig.env.run_until_idle();
    assert_eq!(completion.wait(), Ok(Stamped::new(5, ms(202))));
}

#[test]
fn unanswered_request_expires() {
    let options = SkeletonMethodOptions {
        pending_timeout: Some(Duration::from_millis(20)),
        ..serve_options(CorrelationPolicy::ByRequestId, EvictionPolicy::FailFast)
    };
    let mut rig = ServeRig::new(options, Vec::new());
    let completion = rig.submit(ms(10), 1);

    rig.env.run_until(ms(29));
    assert_eq!(rig.transactor().pending(), 1);
    rig.env.run_until_idle();

    assert_eq!(completion.wait(), Err(CallError::Expired));
    assert_eq!(rig.transactor().pending(), 0);
    assert_eq!(rig.transactor().stats().evicted, 1);
}

#[test]
fn answered_request_does_not_expire() {
    let options = SkeletonMethodOptions {
        pending_timeout: Some(Duration::from_millis(20)),
        ..serve_options(CorrelationPolicy::ByRequestId, EvictionPolicy::FailFast)
    };
    let mut rig = ServeRig::new(options, vec![(ms(20), reply(0, 4))]);
    let completion = rig.submit(ms(10), 1);
    rig.env.run_until_idle();

    assert_eq!(completion.wait(), Ok(Stamped::new(4, ms(22))));
    assert_eq!(rig.transactor().stats().evicted, 0);
}

#[test]
fn reply_without_pending_request_is_dropped() {
    let options = serve_options(CorrelationPolicy::ByRequestId, EvictionPolicy::FailFast);
    let mut rig = ServeRig::new(options, vec![(ms(5), reply(3, 1))]);
    rig.env.run_until_idle();
    assert_eq!(rig.transactor().stats().unmatched_replies, 1);
}

#[test]
fn dropping_transactor_breaks_pending_promises() {
    let options = serve_options(CorrelationPolicy::ByRequestId, EvictionPolicy::FailFast);
    let mut rig = ServeRig::new(options, Vec::new());
    let completion = rig.submit(ms(10), 1);
    rig.env.run_until_idle();
    drop(rig);
    assert_eq!(completion.wait(), Err(CallError::BrokenPromise));
}
