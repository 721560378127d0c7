use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};

use stream_api::{OverflowPolicy, RawRecord, RecordSubscription, StreamError, StreamTransport, now_ms};

fn default_buffer() -> usize {
    1024
}

// ═══════════════════════════════════════════════════════════════
//  Subscriber
// ═══════════════════════════════════════════════════════════════

struct Subscriber {
    tx: mpsc::Sender<RawRecord>,
    overflow: OverflowPolicy,
}

#[derive(Default)]
struct TopicLog {
    next_offset: i64,
    subscribers: Vec<Subscriber>,
}

// ═══════════════════════════════════════════════════════════════
//  MemorySubscription
// ═══════════════════════════════════════════════════════════════

pub struct MemorySubscription {
    rx: mpsc::Receiver<RawRecord>,
}

impl RecordSubscription for MemorySubscription {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<RawRecord, StreamError>>> + Send + '_>> {
        Box::pin(async { self.rx.recv().await.map(Ok) })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

/// In-process брокер. Topic создаётся при первом обращении.
///
/// Каждая подписка получает все записи, опубликованные в её topic'и
/// после подписки, в порядке публикации. Offset'ы — per-topic, с 0.
///
/// С `BackPressure` publish ждёт, пока у самого медленного подписчика
/// появится место; с `Drop` — запись для переполненного подписчика теряется.
/// Ожидание блокирует только свой topic: publish в другой topic из
/// обработчика подписки проходит, даже пока её канал полон.
pub struct MemoryBroker {
    topics: RwLock<HashMap<String, Arc<Mutex<TopicLog>>>>,
    buffer: usize,
    overflow: OverflowPolicy,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(default_buffer(), OverflowPolicy::BackPressure)
    }
}

impl MemoryBroker {
    pub fn new(buffer: usize, overflow: OverflowPolicy) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            overflow,
        }
    }

    /// Следующий offset topic'а (= число опубликованных записей).
    pub async fn next_offset(&self, topic: &str) -> i64 {
        match self.existing(topic).await {
            Some(log) => log.lock().await.next_offset,
            None => 0,
        }
    }

    /// Число живых подписок на topic.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        match self.existing(topic).await {
            Some(log) => log.lock().await.subscribers.iter().filter(|s| !s.tx.is_closed()).count(),
            None => 0,
        }
    }

    /// Отписать всех: их `recv()` вернёт None после дренажа буфера.
    pub async fn close(&self) {
        let logs: Vec<_> = self.topics.read().await.values().cloned().collect();
        for log in logs {
            log.lock().await.subscribers.clear();
        }
    }

    async fn existing(&self, topic: &str) -> Option<Arc<Mutex<TopicLog>>> {
        self.topics.read().await.get(topic).cloned()
    }

    /// Topic по имени; map lock отпускается до возврата.
    async fn topic(&self, topic: &str) -> Arc<Mutex<TopicLog>> {
        if let Some(log) = self.existing(topic).await {
            return log;
        }
        self.topics.write().await.entry(topic.to_string()).or_default().clone()
    }

    async fn subscribe_topics(&self, topics: &[String]) -> MemorySubscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        for topic in topics {
            self.topic(topic).await.lock().await.subscribers.push(Subscriber {
                tx: tx.clone(),
                overflow: self.overflow,
            });
        }
        MemorySubscription { rx }
    }

    async fn deliver(&self, topic: &str, key: Vec<u8>, value: Vec<u8>) -> Result<(), StreamError> {
        // Lock topic'а держится на всю доставку: порядок доставки = порядок offset'ов.
        let entry = self.topic(topic).await;
        let mut log = entry.lock().await;

        let record = RawRecord {
            topic: topic.to_string(),
            partition: 0,
            offset: log.next_offset,
            ts_ms: now_ms(),
            key: Some(key),
            value: Some(value),
        };
        log.next_offset += 1;

        let mut closed = false;
        for sub in &log.subscribers {
            match sub.overflow {
                OverflowPolicy::Drop => match sub.tx.try_send(record.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(%topic, offset = record.offset, "subscriber channel full, dropping");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed = true,
                },
                OverflowPolicy::BackPressure => {
                    if sub.tx.send(record.clone()).await.is_err() {
                        closed = true;
                    }
                }
            }
        }

        if closed {
            log.subscribers.retain(|s| !s.tx.is_closed());
        }
        Ok(())
    }
}

impl StreamTransport for MemoryBroker {
    fn subscribe(
        &self,
        topics: &[String],
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn RecordSubscription>, StreamError>> + Send + '_>> {
        let topics = topics.to_vec();
        Box::pin(async move {
            if topics.is_empty() {
                return Err(StreamError::config("subscribe: no topics"));
            }
            let sub = self.subscribe_topics(&topics).await;
            tracing::debug!(topics = ?topics, "memory subscription created");
            Ok(Box::new(sub) as Box<dyn RecordSubscription>)
        })
    }

    fn publish(
        &self,
        topic: &str,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StreamError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move { self.deliver(&topic, key, value).await })
    }
}
