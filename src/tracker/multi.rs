use std::collections::{BTreeMap, VecDeque};

use nalgebra::Vector2;

use crate::config::TrackerConfig;

/// 同一物体とみなした観測の時系列
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: u64,
    pub positions: VecDeque<Vector2<f64>>,
    pub confidences: VecDeque<f64>,
    pub timestamps: VecDeque<f64>,
    pub missing_frames: u32,
    pub created_at: f64,
}

impl Track {
    fn new(id: u64, pos: Vector2<f64>, conf: f64, timestamp: f64) -> Self {
        Self {
            id,
            positions: VecDeque::from([pos]),
            confidences: VecDeque::from([conf]),
            timestamps: VecDeque::from([timestamp]),
            missing_frames: 0,
            created_at: timestamp,
        }
    }

    pub fn last_position(&self) -> Option<&Vector2<f64>> {
        self.positions.back()
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.timestamps.back().copied()
    }

    pub fn mean_confidence(&self) -> f64 {
        if self.confidences.is_empty() {
            return 0.0;
        }
        self.confidences.iter().sum::<f64>() / self.confidences.len() as f64
    }

    /// 長さ + 最近の活動度 + 平均信頼度
    pub fn score(&self) -> f64 {
        let recency = 10.0 - self.missing_frames as f64;
        self.positions.len() as f64 + recency.max(0.0) + self.mean_confidence() * 10.0
    }

    fn push(&mut self, pos: Vector2<f64>, conf: f64, timestamp: f64, max_history: usize) {
        self.positions.push_back(pos);
        self.confidences.push_back(conf);
        self.timestamps.push_back(timestamp);
        self.missing_frames = 0;
        while self.positions.len() > max_history {
            self.positions.pop_front();
            self.confidences.pop_front();
            self.timestamps.pop_front();
        }
    }
}

/// 貪欲な最近傍割り当てによる複数シャトルの追跡
///
/// 最適割り当てではなく観測順に割り当てる。距離が同じならIDの小さいトラックが勝つ。
#[derive(Debug, Clone)]
pub struct MultiObjectTracker {
    max_objects: usize,
    distance_threshold: f64,
    max_missing_frames: u32,
    max_history: usize,
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
}

impl MultiObjectTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            max_objects: config.max_objects,
            distance_threshold: config.distance_threshold,
            max_missing_frames: config.max_missing_frames,
            max_history: config.max_history.max(1),
            tracks: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// 1フレーム分の観測 (位置, 信頼度) で更新し、生存トラックIDを返す
    pub fn update(&mut self, observations: &[(Vector2<f64>, f64)], timestamp: f64) -> Vec<u64> {
        for track in self.tracks.values_mut() {
            track.missing_frames += 1;
        }

        for &(pos, conf) in observations {
            if let Some(id) = self.find_best_match(&pos) {
                if let Some(track) = self.tracks.get_mut(&id) {
                    track.push(pos, conf, timestamp, self.max_history);
                }
            } else if self.tracks.len() < self.max_objects {
                let id = self.next_id;
                self.next_id += 1;
                log::debug!("Created track {} at ({:.1}, {:.1})", id, pos.x, pos.y);
                self.tracks.insert(id, Track::new(id, pos, conf, timestamp));
            }
        }

        let max_missing = self.max_missing_frames;
        self.tracks.retain(|id, track| {
            let keep = track.missing_frames <= max_missing;
            if !keep {
                log::debug!("Removed lost track {}", id);
            }
            keep
        });

        self.tracks.keys().copied().collect()
    }

    fn find_best_match(&self, pos: &Vector2<f64>) -> Option<u64> {
        let mut best: Option<(u64, f64)> = None;
        for (id, track) in &self.tracks {
            let Some(last) = track.last_position() else {
                continue;
            };
            let d = (pos - last).norm();
            if d < self.distance_threshold && best.map_or(true, |(_, min)| d < min) {
                best = Some((*id, d));
            }
        }
        best.map(|(id, _)| id)
    }

    /// 生存中のトラック（ID昇順）
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// スコア最大のトラック（同点は先に見つかった方）
    pub fn best_track(&self) -> Option<&Track> {
        let mut best: Option<(&Track, f64)> = None;
        for track in self.tracks.values() {
            let score = track.score();
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((track, score));
            }
        }
        best.map(|(t, _)| t)
    }
}
