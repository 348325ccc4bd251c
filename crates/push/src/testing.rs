//! In-memory collaborators and a queue harness for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use courier_core::{Address, GroupId};
use courier_events::{AttachmentProgress, InMemoryEventBus};
use courier_jobs::{
    InMemoryJobStore, InMemoryKeyValueStore, JobQueue, JobRegistry, JobStore, KeyValueStore,
    RequirementContext, RequirementState,
};

use crate::config::DeliveryConfig;
use crate::crypto::{CipherError, KeyMaterial, MessageCipher};
use crate::jobs::register_delivery_jobs;
use crate::media::{MediaConstraints, MediaError};
use crate::model::{
    AccessContext, AccountAttributes, Attachment, AttachmentPointer, AvatarPointer, Envelope,
    GroupRecord, MediaData, OutboundMessage, OutgoingMessage, Plaintext, ProfileKey,
    RecipientSettings, SignedPreKeyRecord, SyncMessage,
};
use crate::receive::ReceiveLock;
use crate::repository::{
    DeliveryNotifier, GroupRepository, MessageDispatcher, MessageRepository, RecipientRepository,
    RepositoryError,
};
use crate::services::PushServices;
use crate::state::DeliveryState;
use crate::transport::{
    AccountManager, MessagePipe, MessageReceiver, MessageSender, OutageMonitor, TransportError,
};

pub fn address(number: &str) -> Address {
    Address::new(number).unwrap()
}

pub fn envelope(guid: &str) -> Envelope {
    Envelope {
        source: address("+15559990000"),
        source_device: 1,
        timestamp: 1,
        server_guid: guid.to_string(),
        content: guid.as_bytes().to_vec(),
    }
}

/// Certificates in tests are just their expiry as big-endian millis.
fn encode_certificate(expires: DateTime<Utc>) -> Vec<u8> {
    expires.timestamp_millis().to_be_bytes().to_vec()
}

/// Tracks how many callers are inside a section at once.
#[derive(Debug, Default)]
pub struct Activity {
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Activity {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeSender {
    sent: Mutex<Vec<(Address, OutboundMessage)>>,
    sync: Mutex<Vec<SyncMessage>>,
    failures: Mutex<VecDeque<TransportError>>,
    uploads: AtomicU64,
}

impl FakeSender {
    /// Successful sends in order.
    pub fn sent(&self) -> Vec<(Address, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sync_messages(&self) -> Vec<SyncMessage> {
        self.sync.lock().unwrap().clone()
    }

    /// Fail the next message send with `error`. Calls stack.
    pub fn fail_next(&self, error: TransportError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn uploads(&self) -> u64 {
        self.uploads.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Result<(), TransportError> {
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl MessageSender for FakeSender {
    fn send_message(
        &self,
        destination: &Address,
        _access: &AccessContext,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        self.take_failure()?;
        self.sent.lock().unwrap().push((destination.clone(), message.clone()));
        Ok(())
    }

    fn send_sync_message(&self, message: &SyncMessage, _access: &AccessContext) -> Result<(), TransportError> {
        self.take_failure()?;
        self.sync.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn upload_attachment(
        &self,
        attachment: &Attachment,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<AttachmentPointer, TransportError> {
        let total = attachment.size();
        progress(total, total / 2);
        progress(total, total);
        let remote_id = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AttachmentPointer {
            remote_id,
            content_type: attachment.content_type.clone(),
            key: vec![7; 32],
            size: total,
            digest: None,
            file_name: attachment.file_name.clone(),
            width: attachment.width,
            height: attachment.height,
            voice_note: attachment.voice_note,
            caption: attachment.caption.clone(),
        })
    }
}

struct FakePipe {
    inbox: Arc<Mutex<VecDeque<Envelope>>>,
    activity: Arc<Activity>,
}

impl MessagePipe for FakePipe {
    fn read(&mut self, timeout: Duration) -> Result<Envelope, TransportError> {
        self.activity.enter();
        let next = self.inbox.lock().unwrap().pop_front();
        let result = match next {
            Some(envelope) => {
                thread::sleep(Duration::from_millis(1));
                Ok(envelope)
            }
            None => {
                thread::sleep(timeout.min(Duration::from_millis(2)));
                Err(TransportError::Timeout)
            }
        };
        self.activity.exit();
        result
    }
}

#[derive(Default)]
pub struct FakeReceiver {
    inbox: Arc<Mutex<VecDeque<Envelope>>>,
    attachments: Mutex<HashMap<u64, Vec<u8>>>,
    activity: Arc<Activity>,
    pipes_opened: AtomicUsize,
    failures: Mutex<VecDeque<TransportError>>,
}

impl FakeReceiver {
    /// Fail the next retrieval with `error`. Calls stack.
    pub fn fail_next(&self, error: TransportError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn push_envelope(&self, envelope: Envelope) {
        self.inbox.lock().unwrap().push_back(envelope);
    }

    pub fn queued(&self) -> usize {
        self.inbox.lock().unwrap().len()
    }

    pub fn put_attachment(&self, remote_id: u64, data: Vec<u8>) {
        self.attachments.lock().unwrap().insert(remote_id, data);
    }

    /// Most readers ever inside the transport at the same time.
    pub fn max_active(&self) -> usize {
        self.activity.max_active.load(Ordering::SeqCst)
    }

    pub fn pipes_opened(&self) -> usize {
        self.pipes_opened.load(Ordering::SeqCst)
    }
}

impl MessageReceiver for FakeReceiver {
    fn retrieve_messages(&self, on_envelope: &mut dyn FnMut(Envelope)) -> Result<(), TransportError> {
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.activity.enter();
        loop {
            let Some(envelope) = self.inbox.lock().unwrap().pop_front() else {
                break;
            };
            thread::sleep(Duration::from_millis(1));
            on_envelope(envelope);
        }
        self.activity.exit();
        Ok(())
    }

    fn open_pipe(&self) -> Result<Box<dyn MessagePipe>, TransportError> {
        self.pipes_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePipe {
            inbox: self.inbox.clone(),
            activity: self.activity.clone(),
        }))
    }

    fn retrieve_attachment(&self, pointer: &AvatarPointer, max_size: u64) -> Result<Vec<u8>, TransportError> {
        let data = self
            .attachments
            .lock()
            .unwrap()
            .get(&pointer.remote_id)
            .cloned()
            .ok_or_else(|| TransportError::status(404, "no such attachment"))?;
        if data.len() as u64 > max_size {
            return Err(TransportError::TooLarge { limit: max_size });
        }
        Ok(data)
    }
}

#[derive(Default)]
pub struct FakeAccounts {
    certificate_fetches: AtomicUsize,
    uploaded_pre_keys: Mutex<Vec<SignedPreKeyRecord>>,
    pre_key_failure: Mutex<Option<TransportError>>,
    profile_failure: AtomicBool,
    profile_names: Mutex<Vec<(ProfileKey, Option<String>)>>,
    profile_avatars: Mutex<Vec<(ProfileKey, Option<Vec<u8>>)>>,
    attributes: Mutex<Vec<AccountAttributes>>,
}

impl FakeAccounts {
    pub fn certificate_fetches(&self) -> usize {
        self.certificate_fetches.load(Ordering::SeqCst)
    }

    /// Successfully published signed pre-keys.
    pub fn uploaded_pre_keys(&self) -> Vec<SignedPreKeyRecord> {
        self.uploaded_pre_keys.lock().unwrap().clone()
    }

    /// Fail every signed pre-key upload with `error` until cleared with `None`.
    pub fn fail_pre_key_uploads(&self, error: Option<TransportError>) {
        *self.pre_key_failure.lock().unwrap() = error;
    }

    pub fn fail_profile_uploads(&self, fail: bool) {
        self.profile_failure.store(fail, Ordering::SeqCst);
    }

    pub fn profile_names(&self) -> Vec<(ProfileKey, Option<String>)> {
        self.profile_names.lock().unwrap().clone()
    }

    pub fn profile_avatars(&self) -> Vec<(ProfileKey, Option<Vec<u8>>)> {
        self.profile_avatars.lock().unwrap().clone()
    }

    pub fn attributes(&self) -> Vec<AccountAttributes> {
        self.attributes.lock().unwrap().clone()
    }

    fn profile_result(&self) -> Result<(), TransportError> {
        if self.profile_failure.load(Ordering::SeqCst) {
            return Err(TransportError::status(403, "profile write refused"));
        }
        Ok(())
    }
}

impl AccountManager for FakeAccounts {
    fn set_signed_pre_key(&self, record: &SignedPreKeyRecord) -> Result<(), TransportError> {
        if let Some(error) = self.pre_key_failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.uploaded_pre_keys.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn sender_certificate(&self) -> Result<Vec<u8>, TransportError> {
        self.certificate_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(encode_certificate(Utc::now() + chrono::Duration::days(30)))
    }

    fn set_profile_name(&self, key: &ProfileKey, name: Option<&str>) -> Result<(), TransportError> {
        self.profile_result()?;
        self.profile_names
            .lock()
            .unwrap()
            .push((key.clone(), name.map(str::to_string)));
        Ok(())
    }

    fn set_profile_avatar(&self, key: &ProfileKey, avatar: Option<&[u8]>) -> Result<(), TransportError> {
        self.profile_result()?;
        self.profile_avatars
            .lock()
            .unwrap()
            .push((key.clone(), avatar.map(<[u8]>::to_vec)));
        Ok(())
    }

    fn set_account_attributes(&self, attributes: &AccountAttributes) -> Result<(), TransportError> {
        self.attributes.lock().unwrap().push(attributes.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeCipher;

impl FakeCipher {
    pub fn certificate_expiring(&self, expires: DateTime<Utc>) -> Vec<u8> {
        encode_certificate(expires)
    }
}

impl MessageCipher for FakeCipher {
    fn decrypt(&self, envelope: &Envelope) -> Result<Plaintext, CipherError> {
        if envelope.content.is_empty() {
            return Err(CipherError::InvalidMessage("empty envelope".into()));
        }
        Ok(Plaintext {
            body: envelope.content.clone(),
        })
    }

    fn certificate_expiration(&self, certificate: &[u8]) -> Result<DateTime<Utc>, CipherError> {
        let bytes: [u8; 8] = certificate
            .try_into()
            .map_err(|_| CipherError::InvalidCertificate("expected 8 bytes".into()))?;
        DateTime::from_timestamp_millis(i64::from_be_bytes(bytes))
            .ok_or_else(|| CipherError::InvalidCertificate("expiry out of range".into()))
    }
}

type DispatchHook = Box<dyn Fn(&Envelope) + Send + Sync>;

#[derive(Default)]
pub struct FakeDispatcher {
    dispatched: Mutex<Vec<String>>,
    hook: Mutex<Option<DispatchHook>>,
}

impl FakeDispatcher {
    /// Server guids in dispatch order.
    pub fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }

    /// Run `hook` inside every later dispatch.
    pub fn on_dispatch(&self, hook: impl Fn(&Envelope) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }
}

impl MessageDispatcher for FakeDispatcher {
    fn dispatch(&self, envelope: &Envelope, _plaintext: Plaintext) -> Result<(), RepositoryError> {
        self.dispatched.lock().unwrap().push(envelope.server_guid.clone());
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(envelope);
        }
        Ok(())
    }
}

pub struct FakeKeys {
    signed_pre_keys: Mutex<Vec<SignedPreKeyRecord>>,
    next_id: AtomicU32,
    profile_keys: AtomicU32,
}

impl Default for FakeKeys {
    fn default() -> Self {
        Self {
            signed_pre_keys: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(100),
            profile_keys: AtomicU32::new(0),
        }
    }
}

impl FakeKeys {
    pub fn add_signed_pre_key(&self, id: u32, created_at: DateTime<Utc>) {
        self.signed_pre_keys.lock().unwrap().push(SignedPreKeyRecord {
            id,
            public_key: vec![1; 33],
            signature: vec![2; 64],
            created_at,
        });
    }

    pub fn signed_pre_key_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.signed_pre_keys.lock().unwrap().iter().map(|r| r.id).collect();
        ids.sort_unstable();
        ids
    }
}

impl KeyMaterial for FakeKeys {
    fn generate_signed_pre_key(&self, now: DateTime<Utc>) -> Result<SignedPreKeyRecord, CipherError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.add_signed_pre_key(id, now);
        Ok(SignedPreKeyRecord {
            id,
            public_key: vec![1; 33],
            signature: vec![2; 64],
            created_at: now,
        })
    }

    fn signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>, CipherError> {
        Ok(self.signed_pre_keys.lock().unwrap().clone())
    }

    fn remove_signed_pre_key(&self, id: u32) -> Result<(), CipherError> {
        self.signed_pre_keys.lock().unwrap().retain(|r| r.id != id);
        Ok(())
    }

    fn generate_profile_key(&self) -> ProfileKey {
        let n = self.profile_keys.fetch_add(1, Ordering::SeqCst) + 1;
        let mut key = vec![0u8; 32];
        key[..4].copy_from_slice(&n.to_be_bytes());
        ProfileKey(key)
    }

    fn derive_access_key(&self, profile_key: &ProfileKey) -> Vec<u8> {
        profile_key.as_bytes().iter().take(16).map(|b| b ^ 0x5a).collect()
    }

    fn registration_id(&self) -> u32 {
        4242
    }
}

pub struct FakeMedia {
    max_size: AtomicU64,
    resize_calls: AtomicUsize,
    thumbnails_fail: AtomicBool,
}

impl Default for FakeMedia {
    fn default() -> Self {
        Self {
            max_size: AtomicU64::new(1024 * 1024),
            resize_calls: AtomicUsize::new(0),
            thumbnails_fail: AtomicBool::new(false),
        }
    }
}

impl FakeMedia {
    pub fn set_max_size(&self, bytes: u64) {
        self.max_size.store(bytes, Ordering::SeqCst);
    }

    pub fn resize_calls(&self) -> usize {
        self.resize_calls.load(Ordering::SeqCst)
    }

    pub fn fail_thumbnails(&self) {
        self.thumbnails_fail.store(true, Ordering::SeqCst);
    }

    fn max_size(&self) -> u64 {
        self.max_size.load(Ordering::SeqCst)
    }
}

impl MediaConstraints for FakeMedia {
    fn is_satisfied(&self, attachment: &Attachment) -> bool {
        attachment.size() <= self.max_size()
    }

    fn can_resize(&self, attachment: &Attachment) -> bool {
        attachment.is_image()
    }

    fn resize(&self, attachment: &Attachment) -> Result<MediaData, MediaError> {
        self.resize_calls.fetch_add(1, Ordering::SeqCst);
        let data = attachment.data.as_ref().ok_or(MediaError::MissingData)?;
        let keep = data.len().min(self.max_size() as usize);
        Ok(MediaData {
            data: data[..keep].to_vec(),
            content_type: attachment.content_type.clone(),
            width: 640,
            height: 480,
        })
    }

    fn thumbnail(&self, data: &[u8], _content_type: &str) -> Result<MediaData, MediaError> {
        if self.thumbnails_fail.load(Ordering::SeqCst) {
            return Err(MediaError::Decode("corrupt image".into()));
        }
        Ok(MediaData {
            data: data.iter().take(4).copied().collect(),
            content_type: "image/jpeg".into(),
            width: 64,
            height: 64,
        })
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    failures: Mutex<Vec<(Address, u64)>>,
}

impl FakeNotifier {
    pub fn failures(&self) -> Vec<(Address, u64)> {
        self.failures.lock().unwrap().clone()
    }
}

impl DeliveryNotifier for FakeNotifier {
    fn message_delivery_failed(&self, destination: &Address, message_id: u64) {
        self.failures.lock().unwrap().push((destination.clone(), message_id));
    }
}

type Hook = Box<dyn FnMut() + Send>;

#[derive(Default)]
pub struct FakeMessages {
    messages: Mutex<HashMap<u64, OutgoingMessage>>,
    sent: Mutex<HashSet<u64>>,
    failed: Mutex<HashSet<u64>>,
    replaced: Mutex<HashMap<u64, Vec<Attachment>>>,
    after_mark_sent: Mutex<Option<Hook>>,
}

impl FakeMessages {
    pub fn store(&self, message: OutgoingMessage) {
        self.messages.lock().unwrap().insert(message.message_id, message);
    }

    pub fn is_marked_sent(&self, message_id: u64) -> bool {
        self.sent.lock().unwrap().contains(&message_id)
    }

    pub fn is_marked_failed(&self, message_id: u64) -> bool {
        self.failed.lock().unwrap().contains(&message_id)
    }

    pub fn replaced(&self, message_id: u64) -> Option<Vec<Attachment>> {
        self.replaced.lock().unwrap().get(&message_id).cloned()
    }

    /// Run `hook` right after a message is recorded as sent.
    pub fn after_mark_sent(&self, hook: impl FnMut() + Send + 'static) {
        *self.after_mark_sent.lock().unwrap() = Some(Box::new(hook));
    }
}

impl MessageRepository for FakeMessages {
    fn message(&self, message_id: u64) -> Result<Option<OutgoingMessage>, RepositoryError> {
        Ok(self.messages.lock().unwrap().get(&message_id).cloned())
    }

    fn is_sent(&self, message_id: u64) -> Result<bool, RepositoryError> {
        Ok(self.is_marked_sent(message_id))
    }

    fn mark_sent(&self, message_id: u64, _unidentified: bool) -> Result<(), RepositoryError> {
        self.sent.lock().unwrap().insert(message_id);
        if let Some(hook) = self.after_mark_sent.lock().unwrap().as_mut() {
            hook();
        }
        Ok(())
    }

    fn mark_failed(&self, message_id: u64) -> Result<(), RepositoryError> {
        self.failed.lock().unwrap().insert(message_id);
        Ok(())
    }

    fn replace_attachments(&self, message_id: u64, attachments: &[Attachment]) -> Result<(), RepositoryError> {
        let mut messages = self.messages.lock().unwrap();
        let message = messages
            .get_mut(&message_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("message {message_id}")))?;
        message.attachments = attachments.to_vec();
        self.replaced.lock().unwrap().insert(message_id, attachments.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeGroups {
    groups: Mutex<HashMap<GroupId, GroupRecord>>,
}

impl FakeGroups {
    pub fn store(&self, record: GroupRecord) {
        self.groups.lock().unwrap().insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &GroupId) -> Option<GroupRecord> {
        self.groups.lock().unwrap().get(id).cloned()
    }
}

impl GroupRepository for FakeGroups {
    fn group(&self, id: &GroupId) -> Result<Option<GroupRecord>, RepositoryError> {
        Ok(self.get(id))
    }

    fn update_avatar(&self, id: &GroupId, avatar: Vec<u8>) -> Result<(), RepositoryError> {
        let mut groups = self.groups.lock().unwrap();
        let record = groups
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("group {id}")))?;
        record.avatar = Some(avatar);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRecipients {
    settings: Mutex<HashMap<Address, RecipientSettings>>,
    blocked: Mutex<Vec<Address>>,
}

impl FakeRecipients {
    pub fn set_system_contact(&self, address: &Address) {
        self.settings
            .lock()
            .unwrap()
            .entry(address.clone())
            .or_default()
            .is_system_contact = true;
    }

    pub fn block(&self, address: Address) {
        self.blocked.lock().unwrap().push(address);
    }
}

impl RecipientRepository for FakeRecipients {
    fn settings(&self, address: &Address) -> Result<RecipientSettings, RepositoryError> {
        Ok(self.settings.lock().unwrap().get(address).cloned().unwrap_or_default())
    }

    fn blocked(&self) -> Result<Vec<Address>, RepositoryError> {
        Ok(self.blocked.lock().unwrap().clone())
    }
}

pub struct FakeOutage {
    reachable: AtomicBool,
}

impl Default for FakeOutage {
    fn default() -> Self {
        Self {
            reachable: AtomicBool::new(true),
        }
    }
}

impl FakeOutage {
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

impl OutageMonitor for FakeOutage {
    fn service_reachable(&self) -> Result<bool, TransportError> {
        Ok(self.reachable.load(Ordering::SeqCst))
    }
}

/// One set of fakes; every `services()` built from it shares their state.
pub struct Fakes {
    pub kv: Arc<dyn KeyValueStore>,
    pub sender: Arc<FakeSender>,
    pub receiver: Arc<FakeReceiver>,
    pub accounts: Arc<FakeAccounts>,
    pub cipher: Arc<FakeCipher>,
    pub dispatcher: Arc<FakeDispatcher>,
    pub keys: Arc<FakeKeys>,
    pub media: Arc<FakeMedia>,
    pub notifier: Arc<FakeNotifier>,
    pub messages: Arc<FakeMessages>,
    pub groups: Arc<FakeGroups>,
    pub recipients: Arc<FakeRecipients>,
    pub outage: Arc<FakeOutage>,
    pub progress: Arc<InMemoryEventBus<AttachmentProgress>>,
    pub receive_lock: ReceiveLock,
}

impl Fakes {
    pub fn new() -> Self {
        Self::with_store(InMemoryKeyValueStore::arc())
    }

    /// Fakes over `kv`, seeded with a valid sender certificate and a profile key.
    pub fn with_store(kv: Arc<dyn KeyValueStore>) -> Self {
        courier_observability::init();
        let fakes = Self {
            kv,
            sender: Arc::default(),
            receiver: Arc::default(),
            accounts: Arc::default(),
            cipher: Arc::default(),
            dispatcher: Arc::default(),
            keys: Arc::default(),
            media: Arc::default(),
            notifier: Arc::default(),
            messages: Arc::default(),
            groups: Arc::default(),
            recipients: Arc::default(),
            outage: Arc::default(),
            progress: Arc::new(InMemoryEventBus::new()),
            receive_lock: ReceiveLock::default(),
        };

        let state = DeliveryState::new(fakes.kv.clone());
        state
            .set_sender_certificate(&encode_certificate(Utc::now() + chrono::Duration::days(30)))
            .unwrap();
        state.set_profile_key(&ProfileKey(vec![0xab; 32])).unwrap();
        fakes
    }

    pub fn services(&self) -> Arc<PushServices> {
        self.services_with(DeliveryConfig::default())
    }

    pub fn services_with(&self, config: DeliveryConfig) -> Arc<PushServices> {
        Arc::new(PushServices {
            config,
            state: DeliveryState::new(self.kv.clone()),
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            accounts: self.accounts.clone(),
            cipher: self.cipher.clone(),
            dispatcher: self.dispatcher.clone(),
            keys: self.keys.clone(),
            media: self.media.clone(),
            notifier: self.notifier.clone(),
            messages: self.messages.clone(),
            groups: self.groups.clone(),
            recipients: self.recipients.clone(),
            outage: self.outage.clone(),
            progress: self.progress.clone(),
            receive_lock: self.receive_lock.clone(),
        })
    }

    pub fn harness(&self) -> Harness {
        self.harness_with(|config| config)
    }

    pub fn harness_with(&self, configure: impl FnOnce(DeliveryConfig) -> DeliveryConfig) -> Harness {
        self.harness_on(InMemoryJobStore::arc(), configure(DeliveryConfig::default()))
    }

    /// A fresh queue over `store` with every requirement satisfied.
    pub fn harness_on(&self, store: Arc<dyn JobStore>, config: DeliveryConfig) -> Harness {
        let services = self.services_with(config);
        let requirements = Arc::new(RequirementState::all_satisfied());
        let mut registry = JobRegistry::new();
        register_delivery_jobs(&mut registry, services.clone());
        let context: Arc<dyn RequirementContext> = requirements.clone();
        let queue = JobQueue::new(store.clone(), registry, context);
        Harness {
            queue,
            services,
            requirements,
            store,
        }
    }
}

pub struct Harness {
    pub queue: JobQueue,
    pub services: Arc<PushServices>,
    pub requirements: Arc<RequirementState>,
    pub store: Arc<dyn JobStore>,
}

impl Harness {
    /// Run everything ready now on this thread.
    pub fn run(&self) -> usize {
        self.queue.run_ready_at(Utc::now())
    }

    /// Run as if `offset` had already passed, releasing due backoffs.
    pub fn run_after(&self, offset: chrono::Duration) -> usize {
        self.queue.run_ready_at(Utc::now() + offset)
    }
}
