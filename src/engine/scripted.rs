use super::{
    EndReason, EngineEvent, MediaEngine, PropertyValue, TrackInfo, TrackKind, props,
};
use anyhow::Result;
use std::collections::{HashMap, HashSet, VecDeque};

/// Engine whose state is driven entirely by the caller. Every command is
/// recorded so tests and fuzz targets can assert on what reached the engine.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    pub properties: HashMap<String, PropertyValue>,
    pub dimensions: Option<(u32, u32)>,
    pub chapter_marks: Vec<f64>,
    pub track_list: Vec<TrackInfo>,
    pub events: VecDeque<EngineEvent>,
    pub loads: Vec<(String, bool)>,
    pub seeks: Vec<f64>,
    pub writes: Vec<(String, PropertyValue)>,
    pub stops: usize,
    /// Properties whose writes fail.
    pub failing_properties: HashSet<String>,
    /// Number of upcoming seeks that fail before seeks succeed again.
    pub failing_seeks: usize,
    pub fail_loads: bool,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_position(&mut self, seconds: Option<f64>) {
        self.set_number(props::TIME_POS, seconds);
    }

    pub fn set_duration(&mut self, seconds: Option<f64>) {
        self.set_number(props::DURATION, seconds);
    }

    pub fn writes_to(&self, name: &str) -> Vec<&PropertyValue> {
        self.writes
            .iter()
            .filter(|(written, _)| written == name)
            .map(|(_, value)| value)
            .collect()
    }

    pub fn is_paused(&self) -> bool {
        self.properties
            .get(props::PAUSE)
            .and_then(PropertyValue::as_bool)
            .unwrap_or(true)
    }

    fn set_number(&mut self, name: &str, value: Option<f64>) {
        match value {
            Some(value) => {
                self.properties
                    .insert(name.to_string(), PropertyValue::Number(value));
            }
            None => {
                self.properties.remove(name);
            }
        }
    }
}

impl MediaEngine for ScriptedEngine {
    fn load(&mut self, media: &str, start_paused: bool) -> Result<()> {
        self.loads.push((media.to_string(), start_paused));
        if self.fail_loads {
            anyhow::bail!("scripted load failure for {media}");
        }
        self.properties
            .insert(props::PATH.to_string(), PropertyValue::Text(media.to_string()));
        self.properties
            .insert(props::PAUSE.to_string(), PropertyValue::Flag(start_paused));
        self.properties.remove(props::TIME_POS);
        self.properties.remove(props::DURATION);
        self.dimensions = None;
        self.events.push_back(EngineEvent::StartFile);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stops += 1;
        self.properties.remove(props::PATH);
        self.properties.remove(props::TIME_POS);
        self.properties.remove(props::DURATION);
        self.events.push_back(EngineEvent::EndFile {
            reason: EndReason::Stop,
        });
        Ok(())
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        self.seeks.push(seconds);
        if self.failing_seeks > 0 {
            self.failing_seeks -= 1;
            anyhow::bail!("scripted seek failure");
        }
        self.set_position(Some(seconds));
        Ok(())
    }

    fn set_property(&mut self, name: &str, value: &PropertyValue) -> Result<()> {
        self.writes.push((name.to_string(), value.clone()));
        if self.failing_properties.contains(name) {
            anyhow::bail!("scripted failure writing {name}");
        }
        self.properties.insert(name.to_string(), value.clone());
        Ok(())
    }

    fn get_property(&self, name: &str) -> Option<PropertyValue> {
        self.properties.get(name).cloned()
    }

    fn video_dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    fn chapters(&self) -> Vec<f64> {
        self.chapter_marks.clone()
    }

    fn tracks(&self, kind: TrackKind) -> Vec<TrackInfo> {
        self.track_list
            .iter()
            .filter(|track| track.kind == kind)
            .cloned()
            .collect()
    }

    fn poll_event(&mut self) -> Option<EngineEvent> {
        self.events.pop_front()
    }
}
