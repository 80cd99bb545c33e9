use std::sync::{Arc, Mutex};

use raubzug_core::config::BalancerConfig;
use raubzug_core::{PeerId, RaubzugError, RemoteException, Task, TaskOutcome};
use raubzug_fabric::{
    Connection, Fabric, JobResult, Opcode, ReadMessage, StealReply, StealRequest, Synchrony,
    WireMessage,
};

use super::LoadBalancer;
use crate::algorithm::ClusterAwareRandomStealing;
use crate::completion::ResultCollector;
use crate::fault_tolerance::ReplicatedTable;

type Outbox = Arc<Mutex<Vec<(PeerId, Vec<u8>)>>>;

struct RecordingFabric {
    local: PeerId,
    sent: Outbox,
    suspects: Mutex<Vec<PeerId>>,
    broken: bool,
}

struct RecordingConnection {
    to: PeerId,
    sent: Outbox,
    broken: bool,
}

impl Connection for RecordingConnection {
    fn remote(&self) -> &PeerId {
        &self.to
    }

    fn deliver(&self, frame: Vec<u8>) -> Result<u64, RaubzugError> {
        if self.broken {
            return Err(RaubzugError::Disconnected(self.to.clone()));
        }
        let len = frame.len() as u64;
        self.sent.lock().unwrap().push((self.to.clone(), frame));
        Ok(len)
    }
}

impl Fabric for RecordingFabric {
    fn local(&self) -> &PeerId {
        &self.local
    }

    fn connect(&self, peer: &PeerId) -> Result<Arc<dyn Connection>, RaubzugError> {
        Ok(Arc::new(RecordingConnection {
            to: peer.clone(),
            sent: self.sent.clone(),
            broken: self.broken,
        }))
    }

    fn maybe_dead(&self, peer: &PeerId) {
        self.suspects.lock().unwrap().push(peer.clone());
    }
}

impl RecordingFabric {
    fn new(local: PeerId, broken: bool) -> Arc<Self> {
        Arc::new(Self {
            local,
            sent: Arc::new(Mutex::new(Vec::new())),
            suspects: Mutex::new(Vec::new()),
            broken,
        })
    }

    fn take_sent(&self) -> Vec<(PeerId, WireMessage)> {
        self.sent
            .lock()
            .unwrap()
            .drain(..)
            .map(|(to, frame)| {
                let mut m = ReadMessage::new(self.local.clone(), frame);
                (to, WireMessage::read_from(&mut m).unwrap())
            })
            .collect()
    }
}

struct Node {
    lb: Arc<LoadBalancer>,
    fabric: Arc<RecordingFabric>,
    results: Arc<ResultCollector>,
}

fn quick_config() -> BalancerConfig {
    BalancerConfig {
        lookup_timeout_ms: 60,
        lookup_poll_ms: 10,
        ..BalancerConfig::default()
    }
}

fn node_with(broken: bool, ft: Option<Arc<ReplicatedTable>>) -> Node {
    let fabric = RecordingFabric::new(PeerId::new("b", "d1"), broken);
    let results = Arc::new(ResultCollector::new());
    let mut builder = LoadBalancer::builder(fabric.clone())
        .config(quick_config())
        .completion(results.clone());
    if let Some(ft) = ft {
        builder = builder.fault_tolerance(ft);
    }
    Node {
        lb: builder.build(),
        fabric,
        results,
    }
}

fn node() -> Node {
    node_with(false, None)
}

fn thief() -> PeerId {
    PeerId::new("c", "d1")
}

fn sync_request() -> StealRequest {
    StealRequest::new(Synchrony::Sync, false, false)
}

fn only_reply(fabric: &RecordingFabric) -> StealReply {
    let mut sent = fabric.take_sent();
    assert_eq!(sent.len(), 1, "expected exactly one message");
    match sent.pop().unwrap().1 {
        WireMessage::StealReply(reply) => reply,
        other => panic!("expected a steal reply, got {other:?}"),
    }
}

#[test]
fn responder_gives_oldest_task_and_registers_it() {
    let n = node();
    n.lb.handle_join(thief());
    let oldest = n.lb.spawn(vec![1]);
    let newest = n.lb.spawn(vec![2]);

    n.lb.handle_steal_request(&thief(), sync_request()).unwrap();

    let reply = only_reply(&n.fabric);
    assert_eq!(reply.opcode(), Opcode::StealReplySuccess);
    let task = reply.task.unwrap();
    assert_eq!(task.stamp(), &oldest);
    assert_eq!(task.stealer(), Some(&thief()));

    assert!(n.lb.is_outstanding(&oldest));
    assert!(!n.lb.is_queued(&oldest));
    assert!(n.lb.is_queued(&newest));
    assert_eq!(n.lb.stats().snapshot().stolen_jobs, 1);
}

#[test]
fn empty_queue_replies_failure() {
    let n = node();
    n.lb.handle_join(thief());
    n.lb
        .handle_steal_request(&thief(), StealRequest::new(Synchrony::Async, false, false))
        .unwrap();
    let reply = only_reply(&n.fabric);
    assert_eq!(reply.opcode(), Opcode::AsyncStealReplyFailed);
    assert_eq!(n.lb.outstanding_len(), 0);
}

#[test]
fn table_is_attached_only_when_ours_is_complete() {
    let ft = Arc::new(ReplicatedTable::new());
    let n = node_with(false, Some(ft));
    n.lb.handle_join(thief());
    n.lb
        .handle_steal_request(&thief(), StealRequest::new(Synchrony::Sync, false, true))
        .unwrap();
    assert_eq!(only_reply(&n.fabric).opcode(), Opcode::StealReplyFailedTable);

    let waiting = Arc::new(ReplicatedTable::awaiting_snapshot());
    let n = node_with(false, Some(waiting));
    n.lb.handle_join(thief());
    n.lb
        .handle_steal_request(&thief(), StealRequest::new(Synchrony::Sync, false, true))
        .unwrap();
    assert_eq!(only_reply(&n.fabric).opcode(), Opcode::StealReplyFailed);
}

#[test]
fn request_from_departed_peer_is_dropped() {
    let n = node();
    n.lb.handle_join(thief());
    let stamp = n.lb.spawn(Vec::new());
    n.lb.handle_crash(&thief());

    n.lb.handle_steal_request(&thief(), sync_request()).unwrap();
    assert!(n.fabric.take_sent().is_empty());
    assert!(n.lb.is_queued(&stamp));
}

#[test]
fn unknown_requester_is_reported_as_maybe_dead() {
    let n = node();
    let stranger = PeerId::new("x", "d9");
    n.lb.handle_steal_request(&stranger, sync_request()).unwrap();
    assert!(n.fabric.take_sent().is_empty());
    assert_eq!(*n.fabric.suspects.lock().unwrap(), vec![stranger]);
}

#[test]
fn undeliverable_reply_puts_task_back() {
    let n = node_with(true, None);
    n.lb.handle_join(thief());
    let stamp = n.lb.spawn(Vec::new());

    n.lb.handle_steal_request(&thief(), sync_request()).unwrap();
    assert!(n.lb.is_queued(&stamp));
    assert!(!n.lb.is_outstanding(&stamp));
}

#[test]
fn stealer_crash_redoes_its_jobs() {
    let n = node();
    n.lb.handle_join(thief());
    let stamp = n.lb.spawn(Vec::new());
    n.lb.handle_steal_request(&thief(), sync_request()).unwrap();
    assert!(n.lb.is_outstanding(&stamp));

    n.lb.handle_crash(&thief());
    assert!(!n.lb.is_outstanding(&stamp));
    assert!(n.lb.is_queued(&stamp));
    assert!(!n.lb.knows_victim(&thief()));
    assert_eq!(n.lb.stats().snapshot().jobs_redone, 1);

    let redone = n.lb.next_local_task().unwrap();
    assert!(redone.stealer().is_none());
}

#[test]
fn reply_from_non_victim_is_fatal() {
    let n = node();
    let err = n.lb.got_steal_reply(&thief(), None).unwrap_err();
    assert!(matches!(err, RaubzugError::UnmatchedReply { .. }));
    assert!(err.is_fatal());
}

#[test]
fn stray_reply_while_exiting_is_requeued() {
    let n = node();
    n.lb.shutdown();
    let owner = PeerId::new("c", "d1");
    let task = Task::new(raubzug_core::Stamp::new(owner.clone(), 3), owner, Vec::new());
    let stamp = task.stamp().clone();
    n.lb.got_steal_reply(&thief(), Some(task)).unwrap();
    assert!(n.lb.is_queued(&stamp));
}

#[test]
fn steal_refused_while_exiting() {
    let n = node();
    n.lb.handle_join(thief());
    n.lb.shutdown();
    assert!(n.lb.steal(&thief(), false).is_none());
    assert!(n.fabric.take_sent().is_empty());
    assert_eq!(n.lb.stats().snapshot().steal_attempts, 0);
}

#[test]
fn steal_from_unknown_victim_sends_nothing() {
    let n = node();
    assert!(n.lb.steal(&thief(), false).is_none());
    assert!(n.fabric.take_sent().is_empty());
}

#[test]
fn duplicate_result_is_dropped() {
    let n = node();
    n.lb.handle_join(thief());
    let stamp = n.lb.spawn(Vec::new());
    n.lb.handle_steal_request(&thief(), sync_request()).unwrap();
    n.fabric.take_sent();

    let exception = RemoteException::new("Overflow", "too deep");
    let result = JobResult::Exception {
        exception: exception.clone(),
        stamp: stamp.clone(),
    };
    n.lb.handle_job_result(&thief(), result.clone()).unwrap();
    assert!(!n.lb.is_outstanding(&stamp));
    assert_eq!(n.lb.pending_results(), 1);

    n.lb.handle_delayed_messages();
    assert_eq!(n.results.exceptions(), 1);
    assert_eq!(n.lb.pending_results(), 0);

    assert!(!n.lb.add_job_result(TaskOutcome::Exception(exception), &stamp));
    n.lb.handle_delayed_messages();
    assert_eq!(n.results.len(), 1);

    let stats = n.lb.stats().snapshot();
    assert_eq!(stats.results_received, 1);
    assert_eq!(stats.results_dropped, 1);
}

#[test]
fn exception_result_is_sent_once() {
    let n = node();
    let owner = PeerId::new("a", "d2");
    n.lb.handle_join(owner.clone());

    let mut task = Task::new(raubzug_core::Stamp::new(owner.clone(), 7), owner.clone(), Vec::new());
    task.set_outcome(TaskOutcome::Exception(RemoteException::new("E", "boom")));

    n.lb.send_result(&mut task).unwrap();
    n.lb.send_result(&mut task).unwrap();

    let sent = n.fabric.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, owner);
    assert!(matches!(sent[0].1, WireMessage::JobResult(JobResult::Exception { .. })));
    let stats = n.lb.stats().snapshot();
    assert_eq!(stats.inter_cluster_messages, 1);
    assert!(stats.result_bytes > 0);
}

#[test]
fn unreachable_owner_hands_result_to_fault_tolerance() {
    let ft = Arc::new(ReplicatedTable::new());
    let n = node_with(false, Some(ft.clone()));
    let owner = PeerId::new("gone", "d1");
    let mut task = Task::new(raubzug_core::Stamp::new(owner.clone(), 1), owner, Vec::new());
    task.set_outcome(TaskOutcome::Value(vec![42]));

    n.lb.send_result(&mut task).unwrap();
    assert!(n.fabric.take_sent().is_empty());
    assert_eq!(
        ft.entry(task.stamp()).unwrap().outcome,
        Some(TaskOutcome::Value(vec![42]))
    );
}

#[test]
fn result_without_outcome_is_an_error() {
    let n = node();
    let owner = PeerId::new("a", "d1");
    n.lb.handle_join(owner.clone());
    let mut task = Task::new(raubzug_core::Stamp::new(owner.clone(), 1), owner, Vec::new());
    assert!(matches!(
        n.lb.send_result(&mut task),
        Err(RaubzugError::MissingOutcome(_))
    ));
}

#[test]
fn reply_from_departed_peer_is_requeued_as_orphan() {
    let n = node();
    n.lb.handle_join(thief());
    n.lb.handle_crash(&thief());

    let task = Task::new(raubzug_core::Stamp::new(thief(), 5), thief(), Vec::new());
    let stamp = task.stamp().clone();
    n.lb
        .handle_reply(
            &thief(),
            StealReply {
                synchrony: Synchrony::Sync,
                task: Some(task),
                table: None,
            },
        )
        .unwrap();

    let requeued = n.lb.next_local_task().unwrap();
    assert_eq!(requeued.stamp(), &stamp);
    assert!(requeued.is_orphan());
}

#[test]
fn async_reply_goes_to_queue_tail() {
    let fabric = RecordingFabric::new(PeerId::new("b", "d1"), false);
    let lb = LoadBalancer::builder(fabric.clone())
        .config(quick_config())
        .algorithm(Box::new(ClusterAwareRandomStealing::new()))
        .build();
    let remote = PeerId::new("r", "d2");
    lb.handle_join(remote.clone());
    let local_work = lb.spawn(Vec::new());

    let task = Task::new(raubzug_core::Stamp::new(remote.clone(), 9), remote.clone(), Vec::new());
    let stamp = task.stamp().clone();
    lb.handle_reply(
        &remote,
        StealReply {
            synchrony: Synchrony::Async,
            task: Some(task),
            table: None,
        },
    )
    .unwrap();

    assert_eq!(lb.next_local_task().unwrap().stamp(), &local_work);
    assert_eq!(lb.next_local_task().unwrap().stamp(), &stamp);
}

#[test]
fn cluster_aware_issues_one_async_request_across_domains() {
    let fabric = RecordingFabric::new(PeerId::new("b", "d1"), false);
    let lb = LoadBalancer::builder(fabric.clone())
        .config(quick_config())
        .algorithm(Box::new(ClusterAwareRandomStealing::new()))
        .build();
    lb.handle_join(PeerId::new("r", "d2"));

    // No same-domain peer, so the iteration returns right after the async send.
    assert!(lb.client_iteration().is_none());
    assert!(lb.client_iteration().is_none());

    let sent = fabric.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.opcode(), Opcode::AsyncStealRequest);
    assert_eq!(lb.stats().snapshot().async_steal_attempts, 1);
}

#[test]
fn owner_crash_forgets_its_jobs_taken_by_our_thieves() {
    let fabric = RecordingFabric::new(PeerId::new("b", "d1"), false);
    let lb = LoadBalancer::builder(fabric.clone())
        .config(quick_config())
        .algorithm(Box::new(ClusterAwareRandomStealing::new()))
        .build();
    let remote = PeerId::new("r", "d2");
    lb.handle_join(remote.clone());
    lb.handle_join(thief());
    let ours = lb.spawn(Vec::new());

    let task = Task::new(raubzug_core::Stamp::new(remote.clone(), 3), remote.clone(), Vec::new());
    let foreign = task.stamp().clone();
    lb.handle_reply(
        &remote,
        StealReply {
            synchrony: Synchrony::Async,
            task: Some(task),
            table: None,
        },
    )
    .unwrap();

    // Steals come off the tail: first r's task, then ours.
    lb.handle_steal_request(&thief(), sync_request()).unwrap();
    lb.handle_steal_request(&thief(), sync_request()).unwrap();
    fabric.take_sent();
    assert!(lb.is_outstanding(&ours));
    assert!(lb.is_outstanding(&foreign));

    lb.handle_crash(&remote);
    assert!(!lb.is_outstanding(&foreign));
    assert!(lb.is_outstanding(&ours));
    assert_eq!(lb.outstanding_len(), 1);
    assert_eq!(lb.queue_len(), 0);
}

#[test]
fn result_waits_for_a_late_owner_join() {
    let n = node();
    let owner = PeerId::new("late", "d2");
    let mut task = Task::new(raubzug_core::Stamp::new(owner.clone(), 5), owner.clone(), Vec::new());
    task.set_outcome(TaskOutcome::Value(vec![7]));

    let joiner = {
        let lb = n.lb.clone();
        let owner = owner.clone();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            lb.handle_join(owner);
        })
    };
    n.lb.send_result(&mut task).unwrap();
    joiner.join().unwrap();

    let sent = n.fabric.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, owner);
    assert!(matches!(sent[0].1, WireMessage::JobResult(JobResult::Normal { .. })));
    assert!(n.fabric.suspects.lock().unwrap().is_empty());
}

#[test]
fn missing_owner_is_reported_as_maybe_dead() {
    let n = node();
    let owner = PeerId::new("ghost", "d1");
    let mut task = Task::new(raubzug_core::Stamp::new(owner.clone(), 1), owner.clone(), Vec::new());
    task.set_outcome(TaskOutcome::Value(vec![1]));

    n.lb.send_result(&mut task).unwrap();
    assert!(n.fabric.take_sent().is_empty());
    assert_eq!(*n.fabric.suspects.lock().unwrap(), vec![owner]);
}

fn frame_from(sender: &PeerId, to: &PeerId, message: &WireMessage) -> Vec<u8> {
    let fabric = RecordingFabric::new(sender.clone(), false);
    let mut m = fabric.new_message(to).unwrap();
    message.write_to(&mut m).unwrap();
    m.finish().unwrap();
    let (_, frame) = fabric.sent.lock().unwrap().pop().unwrap();
    frame
}

#[test]
fn blocking_request_without_handler_thread_is_answered_at_once() {
    use raubzug_fabric::Upcall;

    let fabric = RecordingFabric::new(PeerId::new("b", "d1"), false);
    let lb = LoadBalancer::builder(fabric.clone())
        .config(BalancerConfig {
            queue_steals: false,
            ..quick_config()
        })
        .build();
    lb.handle_join(thief());
    assert!(!lb.has_steal_handler());

    let request = WireMessage::StealRequest(StealRequest::new(Synchrony::Sync, true, false));
    let frame = frame_from(&thief(), lb.local(), &request);
    lb.message(ReadMessage::new(thief(), frame)).unwrap();

    assert_eq!(only_reply(&fabric).opcode(), Opcode::StealReplyFailed);
    assert_eq!(lb.queued_steal_requests(), 0);
}
