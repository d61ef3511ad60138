//! Boosted Haar cascades in the OpenCV XML layout.
//!
//! Only the current `opencv-cascade-classifier` layout is understood, with
//! `BOOST` stages over upright `HAAR` features. Anything else is a load
//! error, never a cascade that silently detects nothing.

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use quick_xml::{Reader, events::Event};
use tracing::info;
use vision::{Result, VisionError};

use crate::integral::IntegralImage;

/// OpenCV lowers every stage threshold by this much when loading.
const THRESHOLD_EPS: f64 = 1e-5;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct WeightedRect {
    pub(crate) x: u32,
    pub(crate) y: u32,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) weight: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct HaarFeature {
    pub(crate) rects: Vec<WeightedRect>,
}

#[derive(Clone, Debug, PartialEq)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

/// Decision tree (usually a single stump) voting one leaf value.
#[derive(Clone, Debug, PartialEq)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

/// A loaded, immutable cascade. Cheap to share between threads.
#[derive(Clone, Debug, PartialEq)]
pub struct Cascade {
    window: (u32, u32),
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

impl Cascade {
    /// Load a cascade from disk; a missing or unreadable artifact is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let xml = fs::read_to_string(path).map_err(|err| load_error(path, err.to_string()))?;
        let cascade = Self::parse(&xml).map_err(|reason| load_error(path, reason))?;
        info!(
            path = %path.display(),
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            "cascade loaded"
        );
        Ok(cascade)
    }

    pub fn from_xml_str(xml: &str) -> Result<Self> {
        Self::parse(xml).map_err(|reason| load_error(Path::new("<memory>"), reason))
    }

    /// Training window `(width, height)`.
    pub fn window(&self) -> (u32, u32) {
        self.window
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Run every stage on the window whose top-left corner is (`x`, `y`).
    ///
    /// The integral image must cover the whole window. Windows with zero
    /// variance are rejected outright, unlike OpenCV, which scores them with
    /// a normalisation factor of 1.
    pub(crate) fn accepts(&self, integral: &IntegralImage, x: u32, y: u32) -> bool {
        let (win_w, win_h) = self.window;
        let (inner_w, inner_h) = (win_w - 2, win_h - 2);
        let area = f64::from(inner_w * inner_h);
        let sum = integral.sum(x + 1, y + 1, inner_w, inner_h) as f64;
        let sq_sum = integral.sq_sum(x + 1, y + 1, inner_w, inner_h) as f64;
        let norm = area * sq_sum - sum * sum;
        if norm <= 0.0 {
            return false;
        }
        let inv_norm = 1.0 / norm.sqrt();

        self.stages.iter().all(|stage| {
            let total: f64 = stage
                .classifiers
                .iter()
                .map(|weak| self.vote(weak, integral, x, y, inv_norm))
                .sum();
            total >= stage.threshold
        })
    }

    fn vote(
        &self,
        weak: &WeakClassifier,
        integral: &IntegralImage,
        x: u32,
        y: u32,
        inv_norm: f64,
    ) -> f64 {
        let mut idx = 0i32;
        loop {
            let node = &weak.nodes[idx as usize];
            let value = self.feature_value(node.feature, integral, x, y) * inv_norm;
            idx = if value < node.threshold {
                node.left
            } else {
                node.right
            };
            if idx <= 0 {
                return weak.leaves[(-idx) as usize];
            }
        }
    }

    fn feature_value(&self, feature: usize, integral: &IntegralImage, x: u32, y: u32) -> f64 {
        self.features[feature]
            .rects
            .iter()
            .map(|r| r.weight * integral.sum(x + r.x, y + r.y, r.width, r.height) as f64)
            .sum()
    }

    fn parse(xml: &str) -> std::result::Result<Self, String> {
        let root = parse_tree(xml)?;
        let storage = root.require("opencv_storage")?;
        let cascade = match storage.child("cascade") {
            Some(node) => node,
            None => {
                return Err(
                    "no <cascade> element; legacy opencv-haar-classifier files are not supported"
                        .to_string(),
                );
            }
        };

        let stage_type = cascade.require("stageType")?.text.trim();
        if stage_type != "BOOST" {
            return Err(format!("unsupported stage type {stage_type:?}"));
        }
        let feature_type = cascade.require("featureType")?.text.trim();
        if feature_type != "HAAR" {
            return Err(format!("unsupported feature type {feature_type:?}"));
        }
        if let Some(params) = cascade.child("featureParams") {
            let categories: u32 = params.child("maxCatCount").map_or(Ok(0), Element::scalar::<u32>)?;
            if categories != 0 {
                return Err("categorical features are not supported".to_string());
            }
        }

        let width: u32 = cascade.require("width")?.scalar()?;
        let height: u32 = cascade.require("height")?.scalar()?;
        if width < 3 || height < 3 {
            return Err(format!("window {width}x{height} is too small"));
        }

        let features = cascade
            .require("features")?
            .items()
            .enumerate()
            .map(|(idx, node)| parse_feature(node, (width, height)).map_err(|e| format!("feature {idx}: {e}")))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let stages = cascade
            .require("stages")?
            .items()
            .enumerate()
            .map(|(idx, node)| parse_stage(node, features.len()).map_err(|e| format!("stage {idx}: {e}")))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if stages.is_empty() {
            return Err("cascade has no stages".to_string());
        }

        Ok(Self {
            window: (width, height),
            stages,
            features,
        })
    }
}

fn load_error(path: &Path, reason: String) -> VisionError {
    VisionError::CascadeLoad {
        path: PathBuf::from(path),
        reason,
    }
}

fn parse_feature(node: &Element, window: (u32, u32)) -> std::result::Result<HaarFeature, String> {
    if let Some(tilted) = node.child("tilted") {
        if tilted.scalar::<i32>()? != 0 {
            return Err("tilted features are not supported".to_string());
        }
    }
    let rects = node
        .require("rects")?
        .items()
        .map(|item| {
            let values: Vec<f64> = item.numbers()?;
            let [x, y, w, h, weight] = values[..] else {
                return Err(format!("rect needs 5 values, got {}", values.len()));
            };
            if x < 0.0 || y < 0.0 || w <= 0.0 || h <= 0.0 {
                return Err(format!("degenerate rect {values:?}"));
            }
            let rect = WeightedRect {
                x: x as u32,
                y: y as u32,
                width: w as u32,
                height: h as u32,
                weight,
            };
            if rect.x + rect.width > window.0 || rect.y + rect.height > window.1 {
                return Err(format!("rect {values:?} leaves the window"));
            }
            Ok(rect)
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if rects.is_empty() {
        return Err("feature has no rects".to_string());
    }
    Ok(HaarFeature { rects })
}

fn parse_stage(node: &Element, feature_count: usize) -> std::result::Result<Stage, String> {
    let threshold: f64 = node.require("stageThreshold")?.scalar()?;
    let classifiers = node
        .require("weakClassifiers")?
        .items()
        .map(|weak| parse_weak(weak, feature_count))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Stage {
        threshold: threshold - THRESHOLD_EPS,
        classifiers,
    })
}

fn parse_weak(node: &Element, feature_count: usize) -> std::result::Result<WeakClassifier, String> {
    let raw: Vec<f64> = node.require("internalNodes")?.numbers()?;
    let leaves: Vec<f64> = node.require("leafValues")?.numbers()?;
    if raw.is_empty() || raw.len() % 4 != 0 {
        return Err(format!(
            "internalNodes holds {} values, expected groups of 4",
            raw.len()
        ));
    }
    let nodes: Vec<Node> = raw
        .chunks_exact(4)
        .map(|chunk| Node {
            left: chunk[0] as i32,
            right: chunk[1] as i32,
            feature: chunk[2] as usize,
            threshold: chunk[3],
        })
        .collect();
    for node in &nodes {
        if node.feature >= feature_count {
            return Err(format!("feature index {} out of range", node.feature));
        }
        for next in [node.left, node.right] {
            let in_range = if next > 0 {
                (next as usize) < nodes.len()
            } else {
                ((-next) as usize) < leaves.len()
            };
            if !in_range {
                return Err(format!("branch {next} out of range"));
            }
        }
    }
    Ok(WeakClassifier { nodes, leaves })
}

/// Bare-bones element tree; attributes are not needed for cascades.
#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn require(&self, name: &str) -> std::result::Result<&Element, String> {
        self.child(name)
            .ok_or_else(|| format!("<{}> is missing <{name}>", self.name))
    }

    /// Anonymous `<_>` sequence entries.
    fn items(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter(|c| c.name == "_")
    }

    fn numbers<T: FromStr>(&self) -> std::result::Result<Vec<T>, String> {
        self.text
            .split_whitespace()
            .map(|tok| {
                tok.parse::<T>()
                    .map_err(|_| format!("<{}>: bad number {tok:?}", self.name))
            })
            .collect()
    }

    fn scalar<T: FromStr>(&self) -> std::result::Result<T, String> {
        let mut values = self.numbers::<T>()?;
        match values.len() {
            1 => Ok(values.remove(0)),
            n => Err(format!("<{}>: expected one value, got {n}", self.name)),
        }
    }
}

fn parse_tree(xml: &str) -> std::result::Result<Element, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack = vec![Element::default()];
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(Element {
                name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                ..Element::default()
            }),
            Ok(Event::Empty(e)) => {
                let element = Element {
                    name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    ..Element::default()
                };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(element);
                }
            }
            Ok(Event::Text(e)) => {
                let text = std::str::from_utf8(e.as_ref())
                    .map_err(|err| format!("invalid UTF-8 in cascade: {err}"))?;
                if let Some(current) = stack.last_mut() {
                    if !current.text.is_empty() {
                        current.text.push(' ');
                    }
                    current.text.push_str(text);
                }
            }
            Ok(Event::End(_)) => {
                let done = stack.pop();
                match (done, stack.last_mut()) {
                    (Some(done), Some(parent)) => parent.children.push(done),
                    _ => return Err("unbalanced closing tag".to_string()),
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(format!(
                    "XML error at byte {}: {err}",
                    reader.buffer_position()
                ));
            }
            _ => {}
        }
        buf.clear();
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(root), true) => Ok(root),
        _ => Err("unexpected end of document".to_string()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// One-stage cascade on a 20x20 window voting for "left half brighter
    /// than right half".
    pub(crate) const EDGE_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>20</height>
  <width>20</width>
  <stageParams>
    <maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <!-- stage 0 -->
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 1.0000000149011612e-01</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 20 20 -1.</_>
        <_>
          0 0 10 20 2.</_></rects>
      <tilted>0</tilted></_></features></cascade>
</opencv_storage>
"#;

    #[test]
    fn parses_stump_cascade() {
        let cascade = Cascade::from_xml_str(EDGE_CASCADE).unwrap();
        assert_eq!(cascade.window(), (20, 20));
        assert_eq!(cascade.stage_count(), 1);
        assert_eq!(cascade.features[0].rects.len(), 2);
        assert_eq!(cascade.features[0].rects[1].weight, 2.0);
        let weak = &cascade.stages[0].classifiers[0];
        assert_eq!(weak.leaves, vec![-1.0, 1.0]);
        assert_eq!(weak.nodes[0].right, -1);
    }

    #[test]
    fn tilted_features_fail_to_load() {
        let xml = EDGE_CASCADE.replace("<tilted>0</tilted>", "<tilted>1</tilted>");
        let err = Cascade::from_xml_str(&xml).unwrap_err();
        assert!(err.to_string().contains("tilted"), "{err}");
    }

    #[test]
    fn unsupported_feature_type_fails_to_load() {
        let xml = EDGE_CASCADE.replace("<featureType>HAAR", "<featureType>LBP");
        assert!(matches!(
            Cascade::from_xml_str(&xml),
            Err(VisionError::CascadeLoad { .. })
        ));
    }

    #[test]
    fn out_of_range_feature_index_fails_to_load() {
        let xml = EDGE_CASCADE.replace("0 -1 0 1.0000000149011612e-01", "0 -1 7 0.1");
        assert!(Cascade::from_xml_str(&xml).is_err());
    }

    #[test]
    fn legacy_and_malformed_documents_fail_to_load() {
        let legacy = r#"<?xml version="1.0"?>
<opencv_storage>
<haarcascade_frontalface_default type_id="opencv-haar-classifier">
  <size>24 24</size>
</haarcascade_frontalface_default>
</opencv_storage>"#;
        assert!(Cascade::from_xml_str(legacy).is_err());
        assert!(Cascade::from_xml_str("<opencv_storage><cascade>").is_err());
        assert!(Cascade::from_xml_str("not xml at all").is_err());
    }

    #[test]
    fn missing_artifact_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.xml");
        match Cascade::load(&path) {
            Err(VisionError::CascadeLoad { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected CascadeLoad, got {other:?}"),
        }
    }
}
